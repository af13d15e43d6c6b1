//! Error taxonomy for the campaign engine.
//!
//! Validation and state errors surface synchronously to the caller.
//! Transport errors carry the remote API's `{error_code, description}`
//! pair so callers can classify them instead of guessing from strings.

use thiserror::Error;

/// All errors produced by Quizcast components.
#[derive(Debug, Error)]
pub enum QuizcastError {
    /// Bad input shape/size/range — rejected before any side effect.
    #[error("validation: {0}")]
    Validation(String),

    /// Remote messaging API rejected or failed a call.
    #[error("transport error {code}: {description}")]
    Transport { code: i64, description: String },

    /// Operation is not valid for the record's current status.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Unknown job or campaign id.
    #[error("not found: {0}")]
    NotFound(String),

    /// SQLite storage failure.
    #[error("storage: {0}")]
    Storage(String),

    /// Configuration load/parse failure.
    #[error("config: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, QuizcastError>;

impl QuizcastError {
    /// Transport error with a code the remote API never uses — for
    /// connection-level failures where no response body exists.
    pub fn transport_io(description: impl Into<String>) -> Self {
        Self::Transport {
            code: 0,
            description: description.into(),
        }
    }

    /// Reduce an error to a short human-readable reason for per-destination
    /// failure reports.
    pub fn short_reason(&self) -> String {
        match self {
            Self::Transport { code, description } => match code {
                403 if description.contains("kicked") => {
                    "bot was removed/kicked from the group".into()
                }
                403 if description.contains("blocked") => "bot was blocked by the chat".into(),
                403 => "bot lacks permission or was blocked/removed from chat".into(),
                400 if description.contains("chat not found") => {
                    "chat not found or invalid chat id".into()
                }
                400 if description.contains("not enough rights") => {
                    "bot lacks permission to send messages in this chat".into()
                }
                400 => format!("bad request: {description}"),
                404 => "chat not found".into(),
                429 => "rate limited - too many requests".into(),
                0 => format!("network error: {description}"),
                _ => format!("api error {code}: {description}"),
            },
            other => other.to_string(),
        }
    }
}

impl From<std::io::Error> for QuizcastError {
    fn from(e: std::io::Error) -> Self {
        Self::Config(e.to_string())
    }
}
