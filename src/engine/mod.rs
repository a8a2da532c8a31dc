use crate::notation::TimingEvent;
use std::sync::{Arc, Mutex};

pub mod output;
pub mod session;

/// Where a playing session sends its notes.
pub trait AudioOutput: Send {
    fn note_on(&mut self, midi: u8, velocity: u8) -> anyhow::Result<()>;

    fn note_off(&mut self, midi: u8) -> anyhow::Result<()>;

    /// Silence every note this output still holds.
    fn all_notes_off(&mut self) -> anyhow::Result<()>;

    /// Called once when the owning component lets go of the output.
    fn release(&mut self) -> anyhow::Result<()> {
        self.all_notes_off()
    }

    /// Strike a chord: note-on for every pitch, stopping at the first failure.
    fn strike(&mut self, pitches: &[u8], velocity: u8) -> anyhow::Result<()> {
        for &midi in pitches {
            self.note_on(midi, velocity)?;
        }
        Ok(())
    }
}

pub type SharedOutput = Arc<Mutex<Box<dyn AudioOutput>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

/// What a session reports back to its controller.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionNotice {
    /// Setup finished and the first cue is about to play.
    Ready,
    Timing(TimingEvent),
    /// Every cue was played.
    Ended,
    /// The session stopped before the end.
    Stopped,
}

/// Everything that can arrive in a controller's inbox.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Session(SessionId, SessionNotice),
    StopRequested,
    RestartRequested,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionOptions {
    /// Playback speed in percent of the written tempo.
    pub warp: u32,
    pub looping: bool,
    pub velocity: u8,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            warp: 100,
            looping: false,
            velocity: 96,
        }
    }
}
