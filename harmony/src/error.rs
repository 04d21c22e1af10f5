//! Error types for the harmony codec

use thiserror::Error;

/// Result type alias using the codec's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while loading an encoding, rendering or parsing
#[derive(Error, Debug)]
pub enum Error {
    #[error("unknown encoding: {0}")]
    UnknownEncoding(String),

    #[error("unknown role: {0}")]
    UnknownRole(String),

    #[error("unknown marker: {0}")]
    UnknownMarker(String),

    #[error("invalid channel {channel:?} (valid channels: {valid:?})")]
    InvalidChannel {
        channel: Option<String>,
        valid: Vec<String>,
    },

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("malformed transcript at token {offset}: {reason}")]
    MalformedTranscript { offset: usize, reason: String },

    #[error(transparent)]
    Tokenizer(#[from] harmony_tokenizer::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn malformed(offset: usize, reason: impl Into<String>) -> Self {
        Self::MalformedTranscript {
            offset,
            reason: reason.into(),
        }
    }
}
