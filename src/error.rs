use thiserror::Error;

/// The notation could not be turned into a playable score.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("Parse error at line {line}, column {column}: {message}")]
    Parse {
        line: usize,
        column: usize,
        message: String,
    },

    #[error("The tune does not contain any notes or rests")]
    NoNotes,
}

impl RenderError {
    pub fn parse(line: usize, column: usize, message: impl Into<String>) -> Self {
        RenderError::Parse {
            line,
            column,
            message: message.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum PlaybackError {
    #[error(transparent)]
    Render(#[from] RenderError),

    #[error("Audio output unavailable: {0}")]
    Output(String),

    #[error("Failed to start playback session: {0}")]
    SessionStart(String),

    #[error("Failed to shut down session {session}: {reason}")]
    SessionShutdown { session: u64, reason: String },
}
