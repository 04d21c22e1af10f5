//! Error types for the tokenizer

use thiserror::Error;

/// Result type alias using the tokenizer's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while loading a vocabulary or converting between text and tokens
#[derive(Error, Debug)]
pub enum Error {
    #[error("text contains disallowed special token {token:?} at byte offset {offset}")]
    DisallowedSpecialToken { token: String, offset: usize },

    #[error("invalid token id: {0}")]
    InvalidToken(u32),

    #[error("decoded bytes are not valid UTF-8: {0}")]
    InvalidUtf8(String),

    #[error("invalid vocabulary: {0}")]
    InvalidVocab(String),

    #[error("malformed vocabulary file at line {line}: {reason}")]
    MalformedVocab { line: usize, reason: String },

    #[error("vocabulary hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("vocabulary not available: {0}")]
    VocabUnavailable(String),

    #[error("download failed: {0}")]
    Download(String),

    #[error("regex error: {0}")]
    Regex(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<fancy_regex::Error> for Error {
    fn from(e: fancy_regex::Error) -> Self {
        Self::Regex(e.to_string())
    }
}

impl From<regex::Error> for Error {
    fn from(e: regex::Error) -> Self {
        Self::Regex(e.to_string())
    }
}
