//! Rank-file loading
//!
//! Vocabularies are distributed as tiktoken rank files: one line per token,
//! `base64(token_bytes) rank`. Files can be verified against a SHA-256
//! digest, located through environment variables, and (with the `download`
//! feature) fetched into a local cache.

use std::collections::HashMap;
use std::fs;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha2::{Digest, Sha256};

use crate::bpe::Rank;
use crate::{Error, Result};

/// Directory searched first for vocabulary files, when set.
pub const ENCODINGS_BASE_ENV: &str = "TIKTOKEN_ENCODINGS_BASE";

/// Overrides the default cache directory.
pub const CACHE_DIR_ENV: &str = "HARMONY_CACHE_DIR";

/// Where a vocabulary file comes from and how to check it.
#[derive(Debug, Clone)]
pub struct VocabFile {
    /// File name, e.g. `o200k_base.tiktoken`
    pub file_name: &'static str,
    /// Canonical download location
    pub url: &'static str,
    /// Lowercase hex SHA-256 of the file contents
    pub sha256: &'static str,
}

/// Parse a tiktoken rank file.
///
/// # Errors
/// Returns [`Error::MalformedVocab`] for a line that is not
/// `base64 SP rank`, or an IO error from the reader.
pub fn load_tiktoken_bpe(reader: impl Read) -> Result<HashMap<Vec<u8>, Rank>> {
    let mut ranks = HashMap::new();
    for (idx, line) in BufReader::new(reader).lines().enumerate() {
        let line = line?;
        let line_no = idx + 1;
        if line.is_empty() {
            continue;
        }
        let (token, rank) = line.split_once(' ').ok_or_else(|| Error::MalformedVocab {
            line: line_no,
            reason: "expected `<base64> <rank>`".into(),
        })?;
        let token = STANDARD.decode(token).map_err(|e| Error::MalformedVocab {
            line: line_no,
            reason: format!("bad base64: {e}"),
        })?;
        let rank: Rank = rank.trim().parse().map_err(|e| Error::MalformedVocab {
            line: line_no,
            reason: format!("bad rank: {e}"),
        })?;
        if ranks.insert(token, rank).is_some() {
            return Err(Error::MalformedVocab {
                line: line_no,
                reason: "duplicate token".into(),
            });
        }
    }
    Ok(ranks)
}

/// Read and parse a rank file, optionally checking its SHA-256 first.
///
/// # Errors
/// Returns [`Error::HashMismatch`] when the digest differs, or any error
/// from [`load_tiktoken_bpe`].
pub fn load_tiktoken_bpe_file(
    path: impl AsRef<Path>,
    expected_sha256: Option<&str>,
) -> Result<HashMap<Vec<u8>, Rank>> {
    let path = path.as_ref();
    let data = fs::read(path)?;
    if let Some(expected) = expected_sha256 {
        verify_sha256(&data, expected)?;
    }
    let ranks = load_tiktoken_bpe(data.as_slice())?;
    tracing::debug!(path = %path.display(), tokens = ranks.len(), "loaded vocabulary");
    Ok(ranks)
}

/// Check `data` against a lowercase hex SHA-256 digest.
///
/// # Errors
/// Returns [`Error::HashMismatch`] if the digests differ.
pub fn verify_sha256(data: &[u8], expected: &str) -> Result<()> {
    let actual = format!("{:x}", Sha256::digest(data));
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        tracing::warn!(%expected, %actual, "vocabulary hash mismatch");
        Err(Error::HashMismatch {
            expected: expected.to_string(),
            actual,
        })
    }
}

/// Default cache directory: `$HARMONY_CACHE_DIR`, else
/// `~/.cache/harmony/encodings`.
#[must_use]
pub fn cache_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(CACHE_DIR_ENV) {
        return PathBuf::from(dir);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home)
        .join(".cache")
        .join("harmony")
        .join("encodings")
}

/// Find a local copy of `file`, downloading it when the `download` feature
/// is enabled and no copy exists.
///
/// # Errors
/// Returns [`Error::VocabUnavailable`] when no copy can be found, or a
/// download/verification error.
pub fn resolve(file: &VocabFile) -> Result<PathBuf> {
    if let Ok(base) = std::env::var(ENCODINGS_BASE_ENV) {
        let path = PathBuf::from(base).join(file.file_name);
        if path.exists() {
            return Ok(path);
        }
        tracing::debug!(path = %path.display(), "not found under {ENCODINGS_BASE_ENV}");
    }

    let cached = cache_dir().join(file.file_name);
    if cached.exists() {
        return Ok(cached);
    }

    fetch(file, &cached)?;
    Ok(cached)
}

/// Load the ranks for `file` from wherever [`resolve`] finds it.
///
/// # Errors
/// See [`resolve`] and [`load_tiktoken_bpe_file`].
pub fn load(file: &VocabFile) -> Result<HashMap<Vec<u8>, Rank>> {
    let path = resolve(file)?;
    load_tiktoken_bpe_file(path, Some(file.sha256))
}

#[cfg(feature = "download")]
fn fetch(file: &VocabFile, dest: &Path) -> Result<()> {
    tracing::info!(url = file.url, dest = %dest.display(), "downloading vocabulary");
    let response = ureq::get(file.url)
        .call()
        .map_err(|e| Error::Download(format!("{}: {e}", file.url)))?;
    let mut data = Vec::new();
    response
        .into_body()
        .as_reader()
        .read_to_end(&mut data)?;
    verify_sha256(&data, file.sha256)?;

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = dest.with_extension("tmp");
    fs::write(&tmp, &data)?;
    fs::rename(&tmp, dest)?;
    Ok(())
}

#[cfg(not(feature = "download"))]
fn fetch(file: &VocabFile, dest: &Path) -> Result<()> {
    Err(Error::VocabUnavailable(format!(
        "{} not found (looked in ${ENCODINGS_BASE_ENV} and {}); enable the `download` feature or fetch {} manually",
        file.file_name,
        dest.display(),
        file.url
    )))
}
