use crate::model::config::Args;
use crate::model::keys::KeyState;
use crate::model::score::{DEFAULT_SCORE, find_preset};
use anyhow::{Context, anyhow};
use log::info;
use std::fs;

/// Picks the ABC text to play: a file, a preset, or the built-in sample.
pub fn load_score_text(args: &Args) -> anyhow::Result<String> {
    if let Some(path) = args.score.as_ref() {
        info!("Reading ABC file: '{}'...", path.display());
        return fs::read_to_string(path)
            .with_context(|| format!("Failed to read ABC file {}", path.display()));
    }

    if let Some(name) = args.preset.as_deref() {
        let preset = find_preset(name)
            .ok_or_else(|| anyhow!("Unknown preset '{}', try `--list-presets`..!", name))?;
        info!("Using preset '{}'..!", preset.name);
        return Ok(preset.abc.to_string());
    }

    info!("No score given, playing the built-in sample..!");
    Ok(DEFAULT_SCORE.to_string())
}

/// One-line text keyboard: white keys in brackets, black keys in angle brackets,
/// highlighted keys filled in.
pub fn render_keyboard(states: &[KeyState]) -> String {
    states
        .iter()
        .map(|state| {
            let (open, close) = if state.key.is_black { ('<', '>') } else { ('[', ']') };
            let label = if state.highlighted {
                format!("{:^3}", "##")
            } else {
                format!("{:^3}", state.key.name.trim_end_matches(char::is_numeric))
            };
            format!("{}{}{}", open, label, close)
        })
        .collect::<Vec<_>>()
        .join("")
}

/// A fixed-width progress bar such as `[##########----------]  50%`.
pub fn render_progress(elapsed_ms: f64, total_ms: f64) -> String {
    const WIDTH: usize = 20;

    let fraction = if total_ms > 0.0 {
        (elapsed_ms / total_ms).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let filled = (fraction * WIDTH as f64).round() as usize;

    format!(
        "[{}{}] {:>3}%",
        "#".repeat(filled),
        "-".repeat(WIDTH - filled),
        (fraction * 100.0).round() as u32
    )
}
