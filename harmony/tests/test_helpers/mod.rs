//! Shared helpers for harmony integration tests.
//!
//! Builds a small byte-level vocabulary (every byte plus a handful of
//! merges) carrying the real harmony special ids, so rendering and parsing
//! can be exercised without the full o200k vocabulary.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Write;

use base64::Engine;
use harmony::{build_harmony_encoding, HarmonyEncoding, HarmonyEncodingName, Rank};

/// Merged tokens, in rank order after the 256 single bytes. Each entry must
/// be the concatenation of two tokens that already exist.
const MERGES: &[&str] = &[
    "he", "ll", "in", "er", "an", " t", "hell", "hello", "us", "user", "on", "en", "ch",
];

/// Ordinary ranks of the synthetic vocabulary.
pub fn ranks() -> HashMap<Vec<u8>, Rank> {
    let mut ranks: HashMap<Vec<u8>, Rank> =
        (0..=255u8).map(|b| (vec![b], Rank::from(b))).collect();
    for merge in MERGES {
        let next = Rank::try_from(ranks.len()).expect("rank overflow");
        ranks.entry(merge.as_bytes().to_vec()).or_insert(next);
    }
    ranks
}

/// Encoding over the synthetic vocabulary.
pub fn encoding() -> HarmonyEncoding {
    build_harmony_encoding(HarmonyEncodingName::HarmonyGptOss, ranks())
        .expect("Failed to build test encoding")
}

/// Tokenize text that may contain special-token surface forms.
pub fn tokens(enc: &HarmonyEncoding, text: &str) -> Vec<Rank> {
    enc.tokenizer()
        .encode_with_special_tokens(text)
        .expect("Failed to tokenize")
}

/// Decode tokens, showing special tokens by their surface form.
pub fn decode(enc: &HarmonyEncoding, tokens: &[Rank]) -> String {
    enc.tokenizer().decode_utf8(tokens).expect("Failed to decode")
}

/// Write the synthetic vocabulary as a tiktoken rank file.
pub fn write_rank_file(dir: &std::path::Path) -> std::path::PathBuf {
    let path = dir.join("test.tiktoken");
    let mut entries: Vec<(Vec<u8>, Rank)> = ranks().into_iter().collect();
    entries.sort_by_key(|(_, rank)| *rank);

    let mut file = std::fs::File::create(&path).expect("Failed to create rank file");
    for (bytes, rank) in entries {
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        writeln!(file, "{encoded} {rank}").expect("Failed to write rank file");
    }
    path
}
