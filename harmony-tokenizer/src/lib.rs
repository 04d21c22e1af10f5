//! Byte-level BPE tokenizer for the harmony chat format
//!
//! Converts between text and token ids over a fixed, pre-built vocabulary.
//! Ordinary text is split by a pre-tokenizer regex and merged by rank;
//! special tokens (`<|start|>`, `<|message|>`, ...) are reserved ids that are
//! never produced from ordinary text.
//!
//! # Vocabularies
//!
//! Rank files use the tiktoken format (see [`vocab`]). [`Pretrained`] knows
//! where to find the built-in vocabularies and how to verify them. Enable the
//! `download` feature to fetch a missing file into the local cache.
//!
//! # Thread Safety
//!
//! [`CoreBpe`] is immutable after construction and `Send + Sync`.

mod bpe;
mod core_bpe;
pub mod error;
pub mod pretrained;
pub mod vocab;

use std::collections::HashSet;

pub use bpe::Rank;
pub use core_bpe::CoreBpe;
pub use error::{Error, Result};
pub use pretrained::{Pretrained, O200K_PATTERN};

/// Trait for tokenizers that convert between text and token ids.
///
/// The chat codec is written against [`CoreBpe`]; this trait is the narrow
/// contract callers can rely on when they only need text in, tokens out.
pub trait Tokenizer {
    /// Encode text, allowing only the listed special-token surface forms.
    ///
    /// # Errors
    /// Returns [`Error::DisallowedSpecialToken`] if `text` contains any other
    /// special-token surface form.
    fn encode(&self, text: &str, allowed_special: &HashSet<&str>) -> Result<Vec<Rank>>;

    /// Decode token ids to raw bytes.
    ///
    /// # Errors
    /// Returns [`Error::InvalidToken`] for an unknown id.
    fn decode(&self, tokens: &[Rank]) -> Result<Vec<u8>>;

    /// Whether `token` is a reserved special id.
    fn is_special(&self, token: Rank) -> bool;

    /// Surface forms of every special token.
    fn special_tokens(&self) -> HashSet<&str>;
}
