//! Error types for gptdrive.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    #[error("Challenge failed after {attempts} attempts")]
    ChallengeFailed { attempts: u32 },

    #[error("Invalid conversation ID: {0}")]
    InvalidConversationId(String),

    /// The remote surfaced an error-styled answer; the message is its text.
    #[error("{0}")]
    ResponseIsError(String),

    #[error("Response not found")]
    ResponseNotFound,

    #[error("Operation timed out: {0}")]
    OperationTimeout(String),

    #[error("Stale element: {0}")]
    StaleElement(String),

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Invalid proxy: {0}")]
    InvalidProxy(String),

    #[error("Session is closed")]
    SessionClosed,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Failures that only mean "the element went away"; callers may re-look it up.
    pub fn is_stale(&self) -> bool {
        matches!(self, Self::StaleElement(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
