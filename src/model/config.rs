use crate::engine::SessionOptions;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "abc_piano",
    about = "Play a tune written in ABC notation and watch the piano keys light up!"
)]
pub struct Args {
    /// Path to an ABC file. Plays the built-in Twinkle Twinkle sample when omitted.
    pub score: Option<PathBuf>,

    /// Play one of the built-in presets instead (a unique prefix is enough).
    #[arg(short, long, conflicts_with = "score")]
    pub preset: Option<String>,

    /// List the built-in presets and exit.
    #[arg(long, default_value_t = false)]
    pub list_presets: bool,

    /// Dry run (render the score, print it as JSON and exit).
    #[arg(short, long, default_value_t = false)]
    pub dry_run: bool,

    /// Playback speed in percent of the written tempo.
    #[arg(short, long, default_value_t = 100, value_parser = clap::value_parser!(u32).range(10..=400))]
    pub warp: u32,

    /// Start over from the top when the tune ends, until stopped with Ctrl-C.
    #[arg(short = 'l', long = "loop", default_value_t = false)]
    pub looping: bool,

    /// Note-on velocity sent to the output.
    #[arg(long, default_value_t = 96, value_parser = clap::value_parser!(u8).range(1..=127))]
    pub velocity: u8,

    /// Record the performance to a MIDI file.
    #[arg(short, long)]
    pub record: Option<PathBuf>,

    /// Also print the sounding pitches and their key names whenever the highlight changes.
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            warp: self.warp,
            looping: self.looping,
            velocity: self.velocity,
        }
    }
}
