//! Error types for timezone resolution

use thiserror::Error;

/// Failure of a single timezone lookup.
///
/// Every variant is recoverable: the engine converts it into a `tz-failed`
/// event and retries under backoff.
#[derive(Error, Debug)]
pub enum TzLookupError {
    #[error("Timezone lookup transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Timezone lookup returned HTTP status {status}")]
    Status { status: u16 },

    #[error("Malformed timezone response: {0}")]
    Malformed(String),

    #[error("Timezone lookup rejected: {message}")]
    Rejected { message: String },

    #[error("Invalid timezone service URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl From<serde_json::Error> for TzLookupError {
    fn from(err: serde_json::Error) -> Self {
        TzLookupError::Malformed(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TzLookupError>;
