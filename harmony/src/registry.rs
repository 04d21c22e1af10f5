//! Named encodings
//!
//! ```no_run
//! use harmony::{load_harmony_encoding, HarmonyEncodingName};
//!
//! let enc = load_harmony_encoding(HarmonyEncodingName::HarmonyGptOss)?;
//! # Ok::<(), harmony::Error>(())
//! ```

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use harmony_tokenizer::{vocab, Pretrained, Rank};

use crate::encoding::HarmonyEncoding;
use crate::{Error, Result};

/// Encodings known to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HarmonyEncodingName {
    /// The gpt-oss chat format over `o200k_harmony`
    HarmonyGptOss,
}

impl HarmonyEncodingName {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::HarmonyGptOss => "HarmonyGptOss",
        }
    }

    /// Vocabulary this encoding is built on.
    #[must_use]
    pub const fn vocabulary(self) -> Pretrained {
        match self {
            Self::HarmonyGptOss => Pretrained::O200kHarmony,
        }
    }
}

impl fmt::Display for HarmonyEncodingName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HarmonyEncodingName {
    type Err = Error;

    /// Accepts `HarmonyGptOss`, `harmony_gpt_oss` and `harmony-gpt-oss` in
    /// any case.
    fn from_str(s: &str) -> Result<Self> {
        let key: String = s
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .flat_map(char::to_lowercase)
            .collect();
        match key.as_str() {
            "harmonygptoss" => Ok(Self::HarmonyGptOss),
            _ => Err(Error::UnknownEncoding(s.to_string())),
        }
    }
}

/// Load a named encoding, locating its vocabulary on disk (and downloading
/// it with the `download` feature).
///
/// # Errors
/// Returns an error if the vocabulary is unavailable or invalid.
pub fn load_harmony_encoding(name: HarmonyEncodingName) -> Result<HarmonyEncoding> {
    let vocabulary = name.vocabulary();
    let tokenizer = vocabulary.load()?;
    HarmonyEncoding::from_tokenizer(name.as_str(), vocabulary.name(), tokenizer)
}

/// Load an encoding by name.
///
/// # Errors
/// Returns [`Error::UnknownEncoding`] for an unrecognized name, or any error
/// from [`load_harmony_encoding`].
pub fn load(name: &str) -> Result<HarmonyEncoding> {
    load_harmony_encoding(name.parse()?)
}

/// Build a named encoding from ordinary ranks the caller already has.
///
/// # Errors
/// Returns an error if the ranks do not form a valid byte-level vocabulary.
pub fn build_harmony_encoding(
    name: HarmonyEncodingName,
    ranks: HashMap<Vec<u8>, Rank>,
) -> Result<HarmonyEncoding> {
    let vocabulary = name.vocabulary();
    let tokenizer = vocabulary.build(ranks)?;
    HarmonyEncoding::from_tokenizer(name.as_str(), vocabulary.name(), tokenizer)
}

/// Build a named encoding from a tiktoken rank file.
///
/// # Errors
/// Returns an error if the file cannot be read, fails the optional SHA-256
/// check, or is not a valid vocabulary.
pub fn load_harmony_encoding_from_file(
    name: HarmonyEncodingName,
    path: impl AsRef<Path>,
    expected_sha256: Option<&str>,
) -> Result<HarmonyEncoding> {
    let ranks = vocab::load_tiktoken_bpe_file(path, expected_sha256)?;
    build_harmony_encoding(name, ranks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_aliases() {
        for alias in ["HarmonyGptOss", "harmony_gpt_oss", "harmony-gpt-oss", "HARMONY_GPT_OSS"] {
            assert_eq!(alias.parse::<HarmonyEncodingName>().unwrap(), HarmonyEncodingName::HarmonyGptOss);
        }
    }

    #[test]
    fn test_unknown_encoding() {
        match load("cl100k_chat") {
            Err(Error::UnknownEncoding(name)) => assert_eq!(name, "cl100k_chat"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_build_from_ranks() {
        let ranks: HashMap<Vec<u8>, Rank> =
            (0..=255u8).map(|b| (vec![b], Rank::from(b))).collect();
        let enc = build_harmony_encoding(HarmonyEncodingName::HarmonyGptOss, ranks).unwrap();
        assert_eq!(enc.name(), "HarmonyGptOss");
        assert_eq!(enc.tokenizer_name(), "o200k_harmony");
    }
}
