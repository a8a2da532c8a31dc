use serde::Serialize;

pub const DEFAULT_SCORE: &str = "X:1
T:Twinkle Twinkle Little Star
M:4/4
L:1/4
K:C
C C G G | A A G2 | F F E E | D D C2 | G G F F | E E D2 | G G F F | E E D2 | C C G G | A A G2 | F F E E | D D C2";

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preset {
    pub name: &'static str,
    pub abc: &'static str,
}

pub const PRESETS: &[Preset] = &[
    Preset {
        name: "Twinkle Twinkle Little Star",
        abc: DEFAULT_SCORE,
    },
    Preset {
        name: "Mary Had a Little Lamb",
        abc: "X:2
T:Mary Had a Little Lamb
M:4/4
L:1/4
K:C
E D C D | E E E2 | D D D2 | E G G2 | E D C D | E E E E | D D E D | C4 |]",
    },
    Preset {
        name: "Ode to Joy",
        abc: "X:3
T:Ode to Joy
M:4/4
L:1/4
Q:1/4=108
K:C
E E F G | G F E D | C C D E | E3/2 D/2 D2 | E E F G | G F E D | C C D E | D3/2 C/2 C2 |]",
    },
];

/// Looks a preset up by its full name or an unambiguous prefix, ignoring case.
pub fn find_preset(name: &str) -> Option<&'static Preset> {
    let wanted = name.trim().to_lowercase();
    if wanted.is_empty() {
        return None;
    }

    if let Some(exact) = PRESETS.iter().find(|p| p.name.to_lowercase() == wanted) {
        return Some(exact);
    }

    let mut matches = PRESETS
        .iter()
        .filter(|p| p.name.to_lowercase().starts_with(&wanted));

    match (matches.next(), matches.next()) {
        (Some(only), None) => Some(only),
        _ => None,
    }
}

/// The editable ABC text of the component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreSource {
    text: String,
}

impl Default for ScoreSource {
    fn default() -> Self {
        Self {
            text: DEFAULT_SCORE.to_string(),
        }
    }
}

impl ScoreSource {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
    }

    pub fn select_preset(&mut self, preset: &Preset) {
        self.text = preset.abc.to_string();
    }
}
