use super::{Renderer, ScoreEvent, VisualScore};
use crate::error::RenderError;
use log::debug;
use std::collections::HashMap;

const DEFAULT_TEMPO_BPM: f64 = 120.0;
const DEFAULT_TEMPO_BEAT: f64 = 0.25;
const MS_PER_MINUTE: f64 = 60_000.0;

const MAX_TEMPO_BPM: f64 = 10_000.0;
/// Longest unit note length or tempo beat, in whole notes.
const MAX_FRACTION: f64 = 64.0;
/// A tune may play for at most a day.
const MAX_SCORE_MS: f64 = 86_400_000.0;
const MAX_LENGTH_FACTOR: u32 = 256;
const MAX_REST_BARS: u32 = 1_000;

const LETTERS: [char; 7] = ['C', 'D', 'E', 'F', 'G', 'A', 'B'];
const SEMITONES: [i32; 7] = [0, 2, 4, 5, 7, 9, 11];
/// Order in which sharps are added to a key signature; flats use the reverse.
const SHARP_ORDER: [char; 7] = ['F', 'C', 'G', 'D', 'A', 'E', 'B'];

/// Renders the commonly used single-voice subset of ABC 2.1.
#[derive(Debug, Clone, Copy, Default)]
pub struct AbcRenderer;

impl Renderer for AbcRenderer {
    fn render(&self, source: &str) -> Result<VisualScore, RenderError> {
        render_abc(source)
    }
}

pub fn render_abc(source: &str) -> Result<VisualScore, RenderError> {
    let mut tune = Tune::default();

    for (idx, raw) in source.lines().enumerate() {
        let line_no = idx + 1;
        let line = match raw.find('%') {
            Some(at) => &raw[..at],
            None => raw,
        };

        if line.trim().is_empty() {
            continue;
        }

        let trimmed = line.trim_start();
        let mut head = trimmed.chars();
        if let (Some(letter), Some(':')) = (head.next(), head.next())
            && letter.is_ascii_alphabetic()
        {
            tune.apply_field(letter, &trimmed[2..], line_no, 1)?;
            continue;
        }

        tune.parse_body_line(line, line_no)?;
    }

    tune.finish()
}

#[derive(Debug, Clone, Copy, Default)]
struct KeySignature {
    fifths: i32,
}

impl KeySignature {
    fn accidental_for(&self, letter: char) -> i32 {
        if self.fifths > 0 {
            let sharps = &SHARP_ORDER[..self.fifths as usize];
            if sharps.contains(&letter) { 1 } else { 0 }
        } else if self.fifths < 0 {
            let flats = SHARP_ORDER.iter().rev().take(self.fifths.unsigned_abs() as usize);
            if flats.copied().any(|l| l == letter) { -1 } else { 0 }
        } else {
            0
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Tempo {
    /// Beat length as a fraction of a whole note; `None` means the unit note length.
    beat: Option<f64>,
    bpm: f64,
}

impl Default for Tempo {
    fn default() -> Self {
        Self {
            beat: Some(DEFAULT_TEMPO_BEAT),
            bpm: DEFAULT_TEMPO_BPM,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct RepeatMark {
    event_index: usize,
    measure_index: usize,
    time_ms: f64,
    measure: usize,
}

#[derive(Debug, Clone, Copy)]
struct Tuplet {
    ratio: f64,
    remaining: usize,
}

#[derive(Debug)]
struct Tune {
    title: Option<String>,
    meter: Option<String>,
    meter_value: Option<f64>,
    unit: Option<f64>,
    tempo: Tempo,
    key: KeySignature,
    key_name: String,

    events: Vec<ScoreEvent>,
    measure_starts: Vec<f64>,
    now_ms: f64,
    measure: usize,
    measure_open: bool,
    bar_accidentals: HashMap<(char, i32), i32>,
    broken: Option<f64>,
    tuplet: Option<Tuplet>,
    repeat_from: RepeatMark,
}

impl Default for Tune {
    fn default() -> Self {
        Self {
            title: None,
            meter: None,
            meter_value: None,
            unit: None,
            tempo: Tempo::default(),
            key: KeySignature::default(),
            key_name: String::from("C"),
            events: Vec::new(),
            measure_starts: Vec::new(),
            now_ms: 0.0,
            measure: 0,
            measure_open: false,
            bar_accidentals: HashMap::new(),
            broken: None,
            tuplet: None,
            repeat_from: RepeatMark {
                event_index: 0,
                measure_index: 0,
                time_ms: 0.0,
                measure: 0,
            },
        }
    }
}

struct Cursor {
    chars: Vec<char>,
    pos: usize,
    line: usize,
}

impl Cursor {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn column(&self) -> usize {
        self.pos + 1
    }

    fn error(&self, message: impl Into<String>) -> RenderError {
        RenderError::parse(self.line, self.column(), message)
    }

    fn digits(&mut self) -> Result<Option<u32>, RenderError> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }

        if start == self.pos {
            return Ok(None);
        }

        let text: String = self.chars[start..self.pos].iter().collect();
        text.parse()
            .map(Some)
            .map_err(|_| RenderError::parse(self.line, start + 1, format!("Number {} is too large", text)))
    }

    /// Skips to just past the next `close`, returning false if the line ends first.
    fn skip_past(&mut self, close: char) -> bool {
        while let Some(c) = self.bump() {
            if c == close {
                return true;
            }
        }
        false
    }
}

impl Tune {
    fn unit(&self) -> f64 {
        self.unit.unwrap_or_else(|| match self.meter_value {
            Some(m) if m < 0.75 => 1.0 / 16.0,
            _ => 1.0 / 8.0,
        })
    }

    fn ms_per_whole(&self) -> f64 {
        let beat = self.tempo.beat.unwrap_or_else(|| self.unit());
        MS_PER_MINUTE / self.tempo.bpm / beat
    }

    fn apply_field(
        &mut self,
        letter: char,
        value: &str,
        line: usize,
        column: usize,
    ) -> Result<(), RenderError> {
        let value = value.trim();
        match letter {
            'T' => {
                if self.title.is_none() && !value.is_empty() {
                    self.title = Some(value.to_string());
                }
            }
            'M' => {
                let (label, meter) = parse_meter(value)
                    .ok_or_else(|| RenderError::parse(line, column, format!("Invalid meter '{}'", value)))?;
                self.meter = label;
                self.meter_value = meter;
            }
            'L' => {
                let unit = parse_fraction(value)
                    .ok_or_else(|| RenderError::parse(line, column, format!("Invalid unit note length '{}'", value)))?;
                self.unit = Some(unit);
            }
            'Q' => {
                self.tempo = parse_tempo(value)
                    .ok_or_else(|| RenderError::parse(line, column, format!("Invalid tempo '{}'", value)))?;
            }
            'K' => {
                let (name, key) = parse_key(value)
                    .ok_or_else(|| RenderError::parse(line, column, format!("Unsupported key signature '{}'", value)))?;
                self.key_name = name;
                self.key = key;
            }
            other => debug!("Ignoring ABC field '{}:' on line {}", other, line),
        }
        Ok(())
    }

    fn parse_body_line(&mut self, line: &str, line_no: usize) -> Result<(), RenderError> {
        let mut cur = Cursor {
            chars: line.chars().collect(),
            pos: 0,
            line: line_no,
        };

        while let Some(c) = cur.peek() {
            match c {
                ' ' | '\t' | '`' | '-' | ')' | 'y' | '\\' => {
                    cur.pos += 1;
                }
                '"' | '!' => {
                    let column = cur.column();
                    cur.pos += 1;
                    if !cur.skip_past(c) {
                        return Err(RenderError::parse(
                            line_no,
                            column,
                            format!("Unterminated '{}'", c),
                        ));
                    }
                }
                '(' => {
                    cur.pos += 1;
                    if let Some(p) = cur.digits()? {
                        self.start_tuplet(p, &cur)?;
                    }
                }
                '|' | ':' => self.parse_bar(&mut cur)?,
                '[' => match cur.peek_at(1) {
                    Some('|') => {
                        cur.pos += 2;
                        self.close_bar();
                    }
                    Some(l) if l.is_ascii_alphabetic() && cur.peek_at(2) == Some(':') => {
                        let column = cur.column();
                        cur.pos += 3;
                        let start = cur.pos;
                        if !cur.skip_past(']') {
                            return Err(cur.error("Unterminated inline field"));
                        }
                        let value: String = cur.chars[start..cur.pos - 1].iter().collect();
                        self.apply_field(l, &value, line_no, column)?;
                    }
                    Some(d) if d.is_ascii_digit() => {
                        return Err(cur.error("Volta endings are not supported"));
                    }
                    _ => self.parse_chord(&mut cur)?,
                },
                '>' | '<' => self.parse_broken_rhythm(&mut cur)?,
                '^' | '_' | '=' | 'A'..='G' | 'a'..='g' => {
                    let column = cur.column();
                    let pitch = self.parse_pitch(&mut cur)?;
                    let length = parse_length(&mut cur)?;
                    self.push_event(vec![pitch], length, line_no, column)?;
                }
                'z' | 'x' => {
                    let column = cur.column();
                    cur.pos += 1;
                    let length = parse_length(&mut cur)?;
                    self.push_event(Vec::new(), length, line_no, column)?;
                }
                'Z' => {
                    let column = cur.column();
                    cur.pos += 1;
                    let bars = cur.digits()?.unwrap_or(1);
                    if bars > MAX_REST_BARS {
                        return Err(RenderError::parse(
                            line_no,
                            column,
                            format!("Multi-measure rest of {} bars is too long", bars),
                        ));
                    }

                    let bar = self.meter_value.unwrap_or(1.0);
                    for n in 0..bars {
                        if n > 0 {
                            self.close_bar();
                        }
                        self.push_event(Vec::new(), bar / self.unit(), line_no, column)?;
                    }
                }
                other => {
                    return Err(cur.error(format!("Unexpected character '{}'", other)));
                }
            }
        }

        Ok(())
    }

    fn parse_pitch(&mut self, cur: &mut Cursor) -> Result<u8, RenderError> {
        let column = cur.column();
        let mut explicit: Option<i32> = None;

        while let Some(c) = cur.peek() {
            let step = match c {
                '^' => 1,
                '_' => -1,
                '=' => 0,
                _ => break,
            };
            cur.pos += 1;
            explicit = Some(match (explicit, step) {
                (_, 0) => 0,
                (Some(acc), s) if acc.signum() == s => acc + s,
                (_, s) => s,
            });
        }

        let Some(letter) = cur.bump().filter(|c| c.is_ascii_alphabetic()) else {
            return Err(RenderError::parse(cur.line, column, "Accidental without a note"));
        };

        let upper = letter.to_ascii_uppercase();
        let Some(step) = LETTERS.iter().position(|&l| l == upper) else {
            return Err(RenderError::parse(cur.line, column, format!("'{}' is not a note", letter)));
        };

        let mut octave: i32 = if letter.is_ascii_uppercase() { 4 } else { 5 };
        while let Some(mark) = cur.peek() {
            match mark {
                '\'' => octave += 1,
                ',' => octave -= 1,
                _ => break,
            }
            cur.pos += 1;
        }

        let accidental = match explicit {
            Some(acc) => {
                self.bar_accidentals.insert((upper, octave), acc);
                acc
            }
            None => self
                .bar_accidentals
                .get(&(upper, octave))
                .copied()
                .unwrap_or_else(|| self.key.accidental_for(upper)),
        };

        let midi = 12 * (octave + 1) + SEMITONES[step] + accidental;
        if !(0..=127).contains(&midi) {
            return Err(RenderError::parse(
                cur.line,
                column,
                format!("Pitch {} is outside the MIDI range", midi),
            ));
        }

        Ok(midi as u8)
    }

    fn parse_chord(&mut self, cur: &mut Cursor) -> Result<(), RenderError> {
        let column = cur.column();
        cur.pos += 1;

        let mut pitches: Vec<u8> = Vec::new();
        let mut inner_length: Option<f64> = None;

        loop {
            match cur.peek() {
                Some(']') => {
                    cur.pos += 1;
                    break;
                }
                Some(' ') | Some('-') => cur.pos += 1,
                Some('^' | '_' | '=' | 'A'..='G' | 'a'..='g') => {
                    let pitch = self.parse_pitch(cur)?;
                    let length = parse_length(cur)?;
                    inner_length.get_or_insert(length);
                    if !pitches.contains(&pitch) {
                        pitches.push(pitch);
                    }
                }
                Some(other) => {
                    return Err(cur.error(format!("Unexpected '{}' inside chord", other)));
                }
                None => {
                    return Err(RenderError::parse(cur.line, column, "Unterminated chord"));
                }
            }
        }

        if pitches.is_empty() {
            return Err(RenderError::parse(cur.line, column, "Empty chord"));
        }

        let length = inner_length.unwrap_or(1.0) * parse_length(cur)?;
        self.push_event(pitches, length, cur.line, column)
    }

    fn parse_bar(&mut self, cur: &mut Cursor) -> Result<(), RenderError> {
        let column = cur.column();
        let mut token = String::new();

        while let Some(c) = cur.peek() {
            let accepted = match c {
                '|' | ':' => true,
                ']' => token.ends_with('|'),
                _ => false,
            };
            if !accepted {
                break;
            }
            token.push(c);
            cur.pos += 1;
        }

        if !token.contains('|') && token != "::" {
            return Err(RenderError::parse(cur.line, column, format!("Invalid bar line '{}'", token)));
        }

        if cur.peek().is_some_and(|c| c.is_ascii_digit()) {
            return Err(cur.error("Volta endings are not supported"));
        }

        self.close_bar();

        if token.starts_with(':') {
            self.play_repeat(cur.line, column)?;
        }
        if token.len() > 1 && token.ends_with(':') {
            self.mark_repeat();
        }

        Ok(())
    }

    fn parse_broken_rhythm(&mut self, cur: &mut Cursor) -> Result<(), RenderError> {
        let column = cur.column();
        let Some(symbol) = cur.bump() else {
            return Ok(());
        };

        let mut depth = 1;
        while cur.peek() == Some(symbol) {
            cur.pos += 1;
            depth += 1;
        }

        let short = 0.5f64.powi(depth);
        let (before, after) = if symbol == '>' {
            (2.0 - short, short)
        } else {
            (short, 2.0 - short)
        };

        let Some(last) = self.events.last_mut() else {
            return Err(RenderError::parse(cur.line, column, "Broken rhythm without a preceding note"));
        };

        let delta = last.duration_ms * (before - 1.0);
        last.duration_ms += delta;
        self.now_ms += delta;
        self.broken = Some(after);

        self.check_length(cur.line, column)
    }

    fn start_tuplet(&mut self, notes: u32, cur: &Cursor) -> Result<(), RenderError> {
        // (p: p notes in the time of q
        let time_of = match notes {
            2 | 4 | 8 => 3,
            3 | 6 => 2,
            5 | 7 | 9 => 2,
            _ => return Err(cur.error(format!("Unsupported tuplet ({}", notes))),
        };

        self.tuplet = Some(Tuplet {
            ratio: time_of as f64 / notes as f64,
            remaining: notes as usize,
        });
        Ok(())
    }

    fn push_event(
        &mut self,
        pitches: Vec<u8>,
        length: f64,
        line: usize,
        column: usize,
    ) -> Result<(), RenderError> {
        let mut wholes = self.unit() * length;

        if let Some(tuplet) = self.tuplet.as_mut() {
            wholes *= tuplet.ratio;
            tuplet.remaining -= 1;
            if tuplet.remaining == 0 {
                self.tuplet = None;
            }
        }

        if let Some(factor) = self.broken.take() {
            wholes *= factor;
        }

        if !self.measure_open {
            self.measure_starts.push(self.now_ms);
            self.measure_open = true;
        }

        let duration_ms = wholes * self.ms_per_whole();
        self.events.push(ScoreEvent {
            time_ms: self.now_ms,
            duration_ms,
            pitches,
            measure: self.measure,
        });
        self.now_ms += duration_ms;

        self.check_length(line, column)
    }

    /// Playback timing only holds up for scores of a sane length.
    fn check_length(&self, line: usize, column: usize) -> Result<(), RenderError> {
        if self.now_ms.is_finite() && self.now_ms <= MAX_SCORE_MS {
            return Ok(());
        }
        Err(RenderError::parse(line, column, "The tune would play for longer than a day"))
    }

    fn close_bar(&mut self) {
        if self.measure_open {
            self.measure += 1;
            self.measure_open = false;
        }
        self.bar_accidentals.clear();
    }

    fn mark_repeat(&mut self) {
        self.repeat_from = RepeatMark {
            event_index: self.events.len(),
            measure_index: self.measure_starts.len(),
            time_ms: self.now_ms,
            measure: self.measure,
        };
    }

    fn play_repeat(&mut self, line: usize, column: usize) -> Result<(), RenderError> {
        let from = self.repeat_from;
        let offset = self.now_ms - from.time_ms;
        let measures = self.measure - from.measure;

        if self.now_ms + offset > MAX_SCORE_MS {
            return Err(RenderError::parse(line, column, "The tune would play for longer than a day"));
        }

        let replay: Vec<ScoreEvent> = self.events[from.event_index..]
            .iter()
            .map(|ev| ScoreEvent {
                time_ms: ev.time_ms + offset,
                measure: ev.measure + measures,
                ..ev.clone()
            })
            .collect();
        let starts: Vec<f64> = self.measure_starts[from.measure_index..]
            .iter()
            .map(|t| t + offset)
            .collect();

        debug!(
            "Repeating {} event(s) across {} measure(s)",
            replay.len(),
            measures
        );

        self.events.extend(replay);
        self.measure_starts.extend(starts);
        self.now_ms += offset;
        self.measure += measures;
        self.mark_repeat();
        Ok(())
    }

    fn finish(self) -> Result<VisualScore, RenderError> {
        if self.events.is_empty() {
            return Err(RenderError::NoNotes);
        }

        let tempo_bpm = match self.tempo.beat {
            Some(beat) => self.tempo.bpm * beat / DEFAULT_TEMPO_BEAT,
            None => self.tempo.bpm * self.unit() / DEFAULT_TEMPO_BEAT,
        };

        Ok(VisualScore {
            unit_length: self.unit(),
            title: self.title,
            meter: self.meter,
            tempo_bpm,
            key: self.key_name,
            events: self.events,
            measure_starts_ms: self.measure_starts,
            total_ms: self.now_ms,
        })
    }
}

/// Reads an optional length multiplier such as `2`, `/`, `//`, `3/2` or `/4`.
fn parse_length(cur: &mut Cursor) -> Result<f64, RenderError> {
    let column = cur.column();
    let numerator = cur.digits()?.unwrap_or(1);
    let mut denominator: u32 = 1;

    while cur.peek() == Some('/') {
        cur.pos += 1;
        denominator = denominator.saturating_mul(cur.digits()?.unwrap_or(2));
    }

    if numerator == 0 || denominator == 0 {
        return Err(RenderError::parse(cur.line, column, "Zero-length note"));
    }
    if numerator > MAX_LENGTH_FACTOR || denominator > MAX_LENGTH_FACTOR {
        return Err(RenderError::parse(
            cur.line,
            column,
            format!("Note length {}/{} is out of range", numerator, denominator),
        ));
    }

    Ok(numerator as f64 / denominator as f64)
}

fn parse_fraction(value: &str) -> Option<f64> {
    let (num, den) = value.trim().split_once('/')?;
    let num: f64 = num.trim().parse().ok()?;
    let den: f64 = den.trim().parse().ok()?;
    let fraction = num / den;
    (fraction.is_finite() && fraction > 0.0 && fraction <= MAX_FRACTION).then_some(fraction)
}

fn parse_meter(value: &str) -> Option<(Option<String>, Option<f64>)> {
    match value {
        "" | "none" => Some((None, None)),
        "C" => Some((Some(String::from("C")), Some(1.0))),
        "C|" => Some((Some(String::from("C|")), Some(1.0))),
        _ => {
            let (num, den) = value.split_once('/')?;
            let beats = num
                .split('+')
                .map(|n| n.trim().parse::<f64>().ok())
                .sum::<Option<f64>>()?;
            let den: f64 = den.trim().parse().ok()?;
            (beats > 0.0 && den > 0.0).then(|| (Some(value.to_string()), Some(beats / den)))
        }
    }
}

fn parse_tempo(value: &str) -> Option<Tempo> {
    // drop any quoted text such as "Allegro"
    let mut plain = String::new();
    let mut quoted = false;
    for c in value.chars() {
        if c == '"' {
            quoted = !quoted;
        } else if !quoted {
            plain.push(c);
        }
    }

    let plain = plain.trim();
    if plain.is_empty() {
        debug!("Tempo '{}' has no number, keeping the default", value);
        return Some(Tempo::default());
    }

    let tempo = match plain.split_once('=') {
        Some((beats, bpm)) => {
            let beat = beats
                .split_whitespace()
                .map(parse_fraction)
                .sum::<Option<f64>>()?;
            Tempo {
                beat: Some(beat),
                bpm: bpm.trim().parse().ok()?,
            }
        }
        None => Tempo {
            beat: None,
            bpm: plain.parse().ok()?,
        },
    };

    let bpm_ok = tempo.bpm.is_finite() && tempo.bpm > 0.0 && tempo.bpm <= MAX_TEMPO_BPM;
    (bpm_ok && tempo.beat.is_none_or(|b| b > 0.0)).then_some(tempo)
}

fn parse_key(value: &str) -> Option<(String, KeySignature)> {
    let token = value.split_whitespace().next().unwrap_or("");
    if token.is_empty() || token.eq_ignore_ascii_case("none") {
        return Some((String::from("C"), KeySignature::default()));
    }

    let mut chars = token.chars();
    let tonic = chars.next()?.to_ascii_uppercase();
    let mut fifths = match tonic {
        'F' => -1,
        'C' => 0,
        'G' => 1,
        'D' => 2,
        'A' => 3,
        'E' => 4,
        'B' => 5,
        _ => return None,
    };

    let rest: String = chars.collect();
    let mode = match (rest.strip_prefix('#'), rest.strip_prefix('b')) {
        (Some(mode), _) => {
            fifths += 7;
            mode
        }
        (None, Some(mode)) => {
            fifths -= 7;
            mode
        }
        (None, None) => rest.as_str(),
    }
    .to_ascii_lowercase();

    fifths += match mode.get(..3).unwrap_or(mode.as_str()) {
        "" | "maj" | "ion" => 0,
        "m" | "min" | "aeo" => -3,
        "mix" => -1,
        "dor" => -2,
        "phr" => -4,
        "loc" => -5,
        "lyd" => 1,
        _ => return None,
    };

    (-7..=7).contains(&fifths).then(|| (token.to_string(), KeySignature { fifths }))
}

#[cfg(test)]
mod test {
    use super::*;

    const FAST: &str = "X:1\nM:4/4\nL:1/4\nQ:1/4=120\n";

    fn pitches(score: &VisualScore) -> Vec<Vec<u8>> {
        score.events.iter().map(|e| e.pitches.clone()).collect()
    }

    fn approx_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn renders_default_twinkle_opening() {
        let score = render_abc("X:1\nT:Twinkle Twinkle Little Star\nM:4/4\nL:1/4\nK:C\nC C G G | A A G2 |")
            .expect("twinkle should render");

        assert_eq!(score.title.as_deref(), Some("Twinkle Twinkle Little Star"));
        assert_eq!(
            pitches(&score),
            vec![vec![60], vec![60], vec![67], vec![67], vec![69], vec![69], vec![67]]
        );
        assert_eq!(score.measure_starts_ms, vec![0.0, 2000.0]);
        assert!(approx_eq(score.events[6].duration_ms, 1000.0));
        assert!(approx_eq(score.total_ms, 4000.0));
        assert_eq!(score.events[4].measure, 1);
    }

    #[test]
    fn octave_marks_and_case() {
        let score = render_abc(&format!("{FAST}K:C\nC, C c c' B,")).unwrap();
        assert_eq!(
            pitches(&score),
            vec![vec![48], vec![60], vec![72], vec![84], vec![59]]
        );
    }

    #[test]
    fn key_signature_applies_until_overridden() {
        let score = render_abc(&format!("{FAST}K:G\nF =F F | F |")).unwrap();
        // the natural lasts until the bar line
        assert_eq!(pitches(&score), vec![vec![66], vec![65], vec![65], vec![66]]);

        let score = render_abc(&format!("{FAST}K:Bb\nB E A")).unwrap();
        assert_eq!(pitches(&score), vec![vec![70], vec![63], vec![69]]);

        let score = render_abc(&format!("{FAST}K:Dm\nB c")).unwrap();
        assert_eq!(pitches(&score), vec![vec![70], vec![72]]);
    }

    #[test]
    fn explicit_accidentals() {
        let score = render_abc(&format!("{FAST}K:C\n^C _D ^^F __B C |")).unwrap();
        assert_eq!(
            pitches(&score),
            vec![vec![61], vec![61], vec![67], vec![69], vec![61]]
        );
    }

    #[test]
    fn lengths_and_default_unit() {
        let score = render_abc("X:1\nM:4/4\nQ:1/4=120\nK:C\nC C2 C/ C// C3/2").unwrap();
        let durations: Vec<f64> = score.events.iter().map(|e| e.duration_ms).collect();
        // L defaults to 1/8 in 4/4, a quarter is 500ms
        assert!(approx_eq(durations[0], 250.0));
        assert!(approx_eq(durations[1], 500.0));
        assert!(approx_eq(durations[2], 125.0));
        assert!(approx_eq(durations[3], 62.5));
        assert!(approx_eq(durations[4], 375.0));

        let score = render_abc("X:1\nM:2/4\nQ:1/4=120\nK:C\nC").unwrap();
        assert!(approx_eq(score.unit_length, 1.0 / 16.0));
    }

    #[test]
    fn chords_rests_and_broken_rhythm() {
        let score = render_abc(&format!("{FAST}K:C\n[CEG]2 z C>D")).unwrap();
        assert_eq!(
            pitches(&score),
            vec![vec![60, 64, 67], vec![], vec![60], vec![62]]
        );
        assert!(approx_eq(score.events[0].duration_ms, 1000.0));
        assert!(approx_eq(score.events[2].duration_ms, 750.0));
        assert!(approx_eq(score.events[3].duration_ms, 250.0));
        assert!(approx_eq(score.events[3].time_ms, 2250.0));
    }

    #[test]
    fn triplets_share_the_time_of_two() {
        let score = render_abc(&format!("{FAST}K:C\n(3CDE F")).unwrap();
        assert!(approx_eq(score.events[2].time_ms + score.events[2].duration_ms, 1000.0));
        assert!(approx_eq(score.events[3].duration_ms, 500.0));
    }

    #[test]
    fn simple_repeat_is_played_twice() {
        let score = render_abc(&format!("{FAST}K:C\n|: C D :| E |]")).unwrap();
        assert_eq!(
            pitches(&score),
            vec![vec![60], vec![62], vec![60], vec![62], vec![64]]
        );
        assert_eq!(score.measure_starts_ms, vec![0.0, 1000.0, 2000.0]);
        assert_eq!(score.events[4].measure, 2);
    }

    #[test]
    fn decorations_chord_symbols_and_inline_fields() {
        let score = render_abc(&format!("{FAST}K:C\n\"C\"!f! C [K:G] F % comment")).unwrap();
        assert_eq!(pitches(&score), vec![vec![60], vec![66]]);
    }

    #[test]
    fn tempo_in_unit_notes() {
        let score = render_abc("X:1\nL:1/8\nQ:240\nK:C\nC").unwrap();
        assert!(approx_eq(score.events[0].duration_ms, 250.0));
        assert!(approx_eq(score.tempo_bpm, 120.0));
    }

    #[test]
    fn rejects_garbage_with_position() {
        let err = render_abc("X:1\nK:C\nC D & E").unwrap_err();
        assert_eq!(
            err,
            RenderError::Parse {
                line: 3,
                column: 5,
                message: String::from("Unexpected character '&'"),
            }
        );
    }

    #[test]
    fn absurd_tempos_and_lengths_are_rejected() {
        for tune in [
            "X:1\nL:1/4\nQ:1/4=1e-300\nK:C\nC |",
            "X:1\nL:1/4\nQ:1/4=inf\nK:C\nC |",
            "X:1\nL:inf/1\nK:C\nC |",
            "X:1\nL:1/4\nQ:1/4=NaN\nK:C\nC |",
            "X:1\nL:1/4\nQ:1/4=20000\nK:C\nC |",
        ] {
            assert!(
                matches!(render_abc(tune), Err(RenderError::Parse { .. })),
                "{:?} should not render",
                tune
            );
        }

        // slow but legal tempos still render, as long as the tune fits in a day
        let score = render_abc("X:1\nL:1/4\nQ:1/4=1\nK:C\nC D |").unwrap();
        assert!(approx_eq(score.total_ms, 120_000.0));

        let err = render_abc("X:1\nL:1/4\nQ:1/4=0.0001\nK:C\nC D |").unwrap_err();
        assert!(matches!(err, RenderError::Parse { line: 5, column: 1, .. }));
    }

    #[test]
    fn oversized_counts_are_positioned_errors() {
        assert_eq!(
            render_abc("X:1\nK:C\nC C99999999999"),
            Err(RenderError::parse(3, 4, "Number 99999999999 is too large"))
        );
        assert!(matches!(
            render_abc("X:1\nK:C\nC C512"),
            Err(RenderError::Parse { line: 3, column: 4, .. })
        ));
        assert!(matches!(
            render_abc("X:1\nK:C\nC/////////"),
            Err(RenderError::Parse { line: 3, column: 2, .. })
        ));
        assert!(matches!(
            render_abc("X:1\nM:4/4\nK:C\nZ4000000000"),
            Err(RenderError::Parse { line: 4, .. })
        ));
        assert!(matches!(
            render_abc("X:1\nM:4/4\nK:C\nZ1001"),
            Err(RenderError::Parse { line: 4, column: 1, .. })
        ));

        let score = render_abc("X:1\nM:4/4\nL:1/4\nQ:1/4=120\nK:C\nZ3 | C").unwrap();
        assert_eq!(score.measure_starts_ms.len(), 4);
        assert!(approx_eq(score.events[3].time_ms, 6000.0));
    }

    #[test]
    fn tempo_without_a_number_keeps_the_default() {
        let score = render_abc("X:1\nL:1/4\nQ:\"Allegro\"\nK:C\nC").unwrap();
        assert!(approx_eq(score.tempo_bpm, DEFAULT_TEMPO_BPM));
        assert!(approx_eq(score.events[0].duration_ms, 500.0));

        let score = render_abc("X:1\nL:1/4\nQ:\"Slowly\" 1/4=60\nK:C\nC").unwrap();
        assert!(approx_eq(score.events[0].duration_ms, 1000.0));
    }

    #[test]
    fn rejects_tunes_without_notes() {
        assert_eq!(render_abc("X:1\nT:Nothing\nK:C\n"), Err(RenderError::NoNotes));
        assert!(matches!(
            render_abc("X:1\nK:H\nC"),
            Err(RenderError::Parse { line: 2, .. })
        ));
        assert!(matches!(
            render_abc("X:1\nK:C\n[CEG"),
            Err(RenderError::Parse { .. })
        ));
        assert!(matches!(
            render_abc("X:1\nK:C\nC |1 D"),
            Err(RenderError::Parse { .. })
        ));
    }
}
