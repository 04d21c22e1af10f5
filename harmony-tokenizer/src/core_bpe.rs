//! Byte-level BPE tokenizer with reserved special tokens
//!
//! Ordinary text is split with a pre-tokenizer regex and every piece is
//! byte-pair merged by rank. Special tokens live outside the merge process:
//! they are only produced when their surface form is explicitly allowed, and
//! never from ordinary text.

#![allow(clippy::cast_possible_truncation)]

use std::collections::{HashMap, HashSet};

use fancy_regex::Regex;

use crate::bpe::{byte_pair_encode, Rank};
use crate::{Error, Result, Tokenizer};

/// A byte-level BPE tokenizer over a fixed vocabulary.
///
/// Immutable after construction and `Send + Sync`, so one instance can be
/// shared by any number of threads.
#[derive(Debug, Clone)]
pub struct CoreBpe {
    /// Token bytes → rank (ordinary vocabulary)
    encoder: HashMap<Vec<u8>, Rank>,
    /// Rank → token bytes
    decoder: HashMap<Rank, Vec<u8>>,
    /// Special token surface form → id
    special_tokens_encoder: HashMap<String, Rank>,
    /// Special id → surface bytes
    special_tokens_decoder: HashMap<Rank, Vec<u8>>,
    /// Pre-tokenizer for ordinary text
    regex: Regex,
    /// Alternation of every special token surface form, longest first
    special_regex: regex::Regex,
}

impl CoreBpe {
    /// Build a tokenizer from ranked token bytes, special tokens and a
    /// pre-tokenizer pattern.
    ///
    /// # Errors
    /// Returns an error if a single byte has no rank, if a special id collides
    /// with an ordinary rank, if two tokens share a rank, or if the pattern
    /// does not compile.
    pub fn new(
        encoder: HashMap<Vec<u8>, Rank>,
        special_tokens_encoder: HashMap<String, Rank>,
        pattern: &str,
    ) -> Result<Self> {
        if let Some(b) = (0..=255u8).find(|b| !encoder.contains_key(&[*b][..])) {
            return Err(Error::InvalidVocab(format!(
                "byte 0x{b:02x} has no rank"
            )));
        }

        let decoder: HashMap<Rank, Vec<u8>> =
            encoder.iter().map(|(k, v)| (*v, k.clone())).collect();
        if decoder.len() != encoder.len() {
            return Err(Error::InvalidVocab(
                "vocabulary contains duplicate ranks".into(),
            ));
        }

        let mut special_tokens_decoder = HashMap::with_capacity(special_tokens_encoder.len());
        for (token, &id) in &special_tokens_encoder {
            if decoder.contains_key(&id) {
                return Err(Error::InvalidVocab(format!(
                    "special token {token} reuses ordinary rank {id}"
                )));
            }
            if special_tokens_decoder
                .insert(id, token.as_bytes().to_vec())
                .is_some()
            {
                return Err(Error::InvalidVocab(format!(
                    "special id {id} is assigned twice"
                )));
            }
        }

        let regex = Regex::new(pattern)?;
        let special_regex = build_special_regex(special_tokens_encoder.keys())?;

        Ok(Self {
            encoder,
            decoder,
            special_tokens_encoder,
            special_tokens_decoder,
            regex,
            special_regex,
        })
    }

    /// Encode text without recognizing special tokens.
    ///
    /// Special-token surface forms in `text` are tokenized as ordinary bytes.
    ///
    /// # Errors
    /// Returns an error if the pre-tokenizer regex fails to run (e.g. it
    /// exceeds its backtracking limit).
    pub fn encode_ordinary(&self, text: &str) -> Result<Vec<Rank>> {
        let mut ret = Vec::new();
        self.encode_ordinary_into(text, &mut ret)?;
        Ok(ret)
    }

    fn encode_ordinary_into(&self, text: &str, into: &mut Vec<Rank>) -> Result<()> {
        for mat in self.regex.find_iter(text) {
            let piece = mat?.as_str().as_bytes();
            if piece.is_empty() {
                continue;
            }
            if let Some(&token) = self.encoder.get(piece) {
                into.push(token);
            } else {
                into.extend(byte_pair_encode(piece, &self.encoder));
            }
        }
        Ok(())
    }

    /// Encode text, turning allowed special-token surface forms into their ids.
    ///
    /// # Errors
    /// Returns [`Error::DisallowedSpecialToken`] if `text` contains the
    /// surface form of a special token that is not in `allowed_special`.
    pub fn encode(&self, text: &str, allowed_special: &HashSet<&str>) -> Result<Vec<Rank>> {
        let mut ret = Vec::new();
        let mut start = 0;
        for mat in self.special_regex.find_iter(text) {
            let token = mat.as_str();
            if !allowed_special.contains(token) {
                return Err(Error::DisallowedSpecialToken {
                    token: token.to_string(),
                    offset: mat.start(),
                });
            }
            self.encode_ordinary_into(&text[start..mat.start()], &mut ret)?;
            ret.push(self.special_tokens_encoder[token]);
            start = mat.end();
        }
        self.encode_ordinary_into(&text[start..], &mut ret)?;
        Ok(ret)
    }

    /// Encode text, recognizing every special token.
    ///
    /// # Errors
    /// Returns an error if the pre-tokenizer regex fails to run.
    pub fn encode_with_special_tokens(&self, text: &str) -> Result<Vec<Rank>> {
        let allowed = self.special_tokens();
        self.encode(text, &allowed)
    }

    /// Decode ids to raw bytes. Special ids decode to their surface form.
    ///
    /// # Errors
    /// Returns [`Error::InvalidToken`] for an id outside the vocabulary.
    pub fn decode_bytes(&self, tokens: &[Rank]) -> Result<Vec<u8>> {
        let mut ret = Vec::with_capacity(tokens.len() * 2);
        for &token in tokens {
            let bytes = self
                .decoder
                .get(&token)
                .or_else(|| self.special_tokens_decoder.get(&token))
                .ok_or(Error::InvalidToken(token))?;
            ret.extend_from_slice(bytes);
        }
        Ok(ret)
    }

    /// Decode ids to a string, failing on invalid UTF-8.
    ///
    /// A multi-byte character split across tokens fails until all of its
    /// tokens are present, which lets streaming callers buffer.
    ///
    /// # Errors
    /// Returns [`Error::InvalidToken`] or [`Error::InvalidUtf8`].
    pub fn decode_utf8(&self, tokens: &[Rank]) -> Result<String> {
        let bytes = self.decode_bytes(tokens)?;
        String::from_utf8(bytes).map_err(|e| Error::InvalidUtf8(e.to_string()))
    }

    /// Decode ids to a string, replacing invalid UTF-8 with U+FFFD.
    ///
    /// # Errors
    /// Returns [`Error::InvalidToken`] for an id outside the vocabulary.
    pub fn decode_lossy(&self, tokens: &[Rank]) -> Result<String> {
        let bytes = self.decode_bytes(tokens)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Whether `token` is a reserved special id.
    #[must_use]
    pub fn is_special_token(&self, token: Rank) -> bool {
        self.special_tokens_decoder.contains_key(&token)
    }

    /// Surface forms of every special token.
    #[must_use]
    pub fn special_tokens(&self) -> HashSet<&str> {
        self.special_tokens_encoder
            .keys()
            .map(String::as_str)
            .collect()
    }

    /// Id of the special token with the given surface form.
    #[must_use]
    pub fn token_for_special(&self, token: &str) -> Option<Rank> {
        self.special_tokens_encoder.get(token).copied()
    }

    /// Number of ordinary plus special tokens.
    #[must_use]
    pub fn vocab_size(&self) -> usize {
        self.encoder.len() + self.special_tokens_encoder.len()
    }
}

impl Tokenizer for CoreBpe {
    fn encode(&self, text: &str, allowed_special: &HashSet<&str>) -> Result<Vec<Rank>> {
        CoreBpe::encode(self, text, allowed_special)
    }

    fn decode(&self, tokens: &[Rank]) -> Result<Vec<u8>> {
        self.decode_bytes(tokens)
    }

    fn is_special(&self, token: Rank) -> bool {
        self.is_special_token(token)
    }

    fn special_tokens(&self) -> HashSet<&str> {
        CoreBpe::special_tokens(self)
    }
}

/// Build an alternation over the special tokens.
///
/// Longer surface forms come first so a token that prefixes another can
/// never shadow it.
fn build_special_regex<'a>(tokens: impl Iterator<Item = &'a String>) -> Result<regex::Regex> {
    let mut tokens: Vec<&String> = tokens.collect();
    tokens.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    let pattern = tokens
        .iter()
        .map(|t| regex::escape(t))
        .collect::<Vec<_>>()
        .join("|");
    // An empty alternation would match the empty string everywhere.
    let pattern = if pattern.is_empty() {
        "[^\\s\\S]".to_string()
    } else {
        pattern
    };
    Ok(regex::Regex::new(&pattern)?)
}
