//! Pretrained vocabularies
//!
//! `o200k_harmony` is the o200k_base vocabulary and pre-tokenizer extended
//! with the special tokens of the harmony chat format.

#![allow(clippy::doc_markdown)]

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::bpe::Rank;
use crate::core_bpe::CoreBpe;
use crate::vocab::{self, VocabFile};
use crate::{Error, Result};

/// Pre-tokenizer pattern shared by the o200k family.
pub const O200K_PATTERN: &str = concat!(
    r"[^\r\n\p{L}\p{N}]?[\p{Lu}\p{Lt}\p{Lm}\p{Lo}\p{M}]*[\p{Ll}\p{Lm}\p{Lo}\p{M}]+(?i:'s|'t|'re|'ve|'m|'ll|'d)?",
    r"|[^\r\n\p{L}\p{N}]?[\p{Lu}\p{Lt}\p{Lm}\p{Lo}\p{M}]+[\p{Ll}\p{Lm}\p{Lo}\p{M}]*(?i:'s|'t|'re|'ve|'m|'ll|'d)?",
    r"|\p{N}{1,3}",
    r"| ?[^\s\p{L}\p{N}]+[\r\n/]*",
    r"|\s*[\r\n]+",
    r"|\s+(?!\S)",
    r"|\s+",
);

/// The o200k_base rank file.
pub const O200K_BASE_FILE: VocabFile = VocabFile {
    file_name: "o200k_base.tiktoken",
    url: "https://openaipublic.blob.core.windows.net/encodings/o200k_base.tiktoken",
    sha256: "446a9538cb6c348e3516120d7c08b09f57c36495e2acfffe59a5bf8b0cfb1a2d",
};

/// First id after the ordinary o200k_base ranks.
const O200K_HARMONY_SPECIAL_START: Rank = 199_998;

/// One past the last harmony special id.
const O200K_HARMONY_VOCAB_END: Rank = 201_088;

/// Named special tokens of `o200k_harmony`. Every other id in
/// `200000..201088` is a `<|reserved_N|>` placeholder.
const O200K_HARMONY_NAMED: &[(&str, Rank)] = &[
    ("<|startoftext|>", 199_998),
    ("<|endoftext|>", 199_999),
    ("<|return|>", 200_002),
    ("<|constrain|>", 200_003),
    ("<|channel|>", 200_005),
    ("<|start|>", 200_006),
    ("<|end|>", 200_007),
    ("<|message|>", 200_008),
    ("<|call|>", 200_012),
    ("<|endofprompt|>", 200_018),
];

/// Pretrained vocabularies that can be loaded by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pretrained {
    /// o200k_base with the harmony chat special tokens
    O200kHarmony,
}

impl Pretrained {
    /// Canonical name
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::O200kHarmony => "o200k_harmony",
        }
    }

    /// Special token table for this vocabulary.
    #[must_use]
    pub fn special_tokens(self) -> HashMap<String, Rank> {
        match self {
            Self::O200kHarmony => o200k_harmony_special_tokens(),
        }
    }

    /// Locate (and with the `download` feature, fetch) the rank file and
    /// build the tokenizer.
    ///
    /// # Errors
    /// Returns an error if the vocabulary cannot be found, fails
    /// verification, or is malformed.
    pub fn load(self) -> Result<CoreBpe> {
        match self {
            Self::O200kHarmony => {
                let ranks = vocab::load(&O200K_BASE_FILE)?;
                self.build(ranks)
            }
        }
    }

    /// Build the tokenizer from already-loaded ordinary ranks.
    ///
    /// # Errors
    /// Returns an error if the ranks do not form a valid byte-level
    /// vocabulary.
    pub fn build(self, ranks: HashMap<Vec<u8>, Rank>) -> Result<CoreBpe> {
        let tokenizer = CoreBpe::new(ranks, self.special_tokens(), O200K_PATTERN)?;
        tracing::debug!(
            vocab = self.name(),
            size = tokenizer.vocab_size(),
            "built tokenizer"
        );
        Ok(tokenizer)
    }
}

impl fmt::Display for Pretrained {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Pretrained {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "o200k_harmony" => Ok(Self::O200kHarmony),
            other => Err(Error::VocabUnavailable(format!(
                "unknown vocabulary {other:?}"
            ))),
        }
    }
}

fn o200k_harmony_special_tokens() -> HashMap<String, Rank> {
    let mut specials: HashMap<String, Rank> = O200K_HARMONY_NAMED
        .iter()
        .map(|&(name, id)| (name.to_string(), id))
        .collect();
    let named: Vec<Rank> = O200K_HARMONY_NAMED.iter().map(|&(_, id)| id).collect();
    for id in O200K_HARMONY_SPECIAL_START..O200K_HARMONY_VOCAB_END {
        if !named.contains(&id) {
            specials.insert(format!("<|reserved_{id}|>"), id);
        }
    }
    specials
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_harmony_special_table() {
        let specials = Pretrained::O200kHarmony.special_tokens();
        assert_eq!(specials.len(), (O200K_HARMONY_VOCAB_END - O200K_HARMONY_SPECIAL_START) as usize);
        assert_eq!(specials["<|start|>"], 200_006);
        assert_eq!(specials["<|message|>"], 200_008);
        assert_eq!(specials["<|reserved_200000|>"], 200_000);
        assert_eq!(specials["<|reserved_201087|>"], 201_087);
        assert!(!specials.contains_key("<|reserved_200006|>"));
    }

    #[test]
    fn test_name_roundtrip() {
        let p: Pretrained = "o200k_harmony".parse().unwrap();
        assert_eq!(p, Pretrained::O200kHarmony);
        assert_eq!(p.to_string(), "o200k_harmony");
        assert!("cl100k_base".parse::<Pretrained>().is_err());
    }

    #[test]
    fn test_pattern_compiles() {
        assert!(fancy_regex::Regex::new(O200K_PATTERN).is_ok());
    }

    #[test]
    fn test_from_byte_ranks() {
        let ranks: HashMap<Vec<u8>, Rank> =
            (0..=255u8).map(|b| (vec![b], Rank::from(b))).collect();
        let tok = Pretrained::O200kHarmony.build(ranks).unwrap();
        let ids = tok.encode_ordinary("Hello, world! 123").unwrap();
        assert_eq!(tok.decode_utf8(&ids).unwrap(), "Hello, world! 123");
        assert_eq!(tok.token_for_special("<|call|>"), Some(200_012));
    }
}
