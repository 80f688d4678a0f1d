//! Naming helpers: repository splitting and Kubernetes-safe record names.

use thiserror::Error;

/// Maximum length of a Kubernetes-style DNS label.
const MAX_NAME_LEN: usize = 63;

/// Sanitized names at or above this length get the hash suffix treatment.
const HASH_THRESHOLD: usize = 57;

/// Prefix length kept in front of the `-<fnv32a>` suffix so the final name
/// stays within [`MAX_NAME_LEN`].
const HASH_PREFIX_LEN: usize = MAX_NAME_LEN - 9;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid repository format: {repository:?} must contain {separator:?} exactly once")]
pub struct SplitError {
    pub repository: String,
    pub separator: String,
}

/// Split a repository path at `separator`, which must occur exactly once.
///
/// Returns `(left, right)` on success.
///
/// # Errors
/// Returns [`SplitError`] when the separator is absent or ambiguous.
pub fn split_repository<'a>(
    repository: &'a str,
    separator: &str,
) -> Result<(&'a str, &'a str), SplitError> {
    let mut parts = repository.split(separator);
    match (parts.next(), parts.next(), parts.next()) {
        (Some(left), Some(right), None) => Ok((left, right)),
        _ => Err(SplitError {
            repository: repository.to_owned(),
            separator: separator.to_owned(),
        }),
    }
}

/// Turn arbitrary input into a valid Kubernetes-style DNS label.
///
/// Lowercases, replaces every maximal run of characters outside `[a-z0-9]`
/// with a single `-`, trims leading and trailing dashes, and truncates to 63
/// characters (trimming a trailing dash the truncation may expose).
#[must_use]
pub fn sanitize_name(input: &str) -> String {
    let mut out = String::with_capacity(input.len().min(MAX_NAME_LEN));
    let mut pending_dash = false;
    for c in input.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(c);
        } else {
            pending_dash = true;
        }
    }
    out.truncate(MAX_NAME_LEN);
    while out.ends_with('-') {
        out.pop();
    }
    out
}

/// Sanitize `input` into a name that stays unique under truncation.
///
/// Short results are returned as-is; longer ones are cut down and suffixed
/// with `-<fnv32a(input) in hex>` so distinct long inputs keep distinct
/// names. Deterministic and stable across runs.
#[must_use]
pub fn sanitize_with_hash(input: &str) -> String {
    let sanitized = sanitize_name(input);
    if sanitized.len() < HASH_THRESHOLD {
        return sanitized;
    }
    let mut prefix: String = sanitized.chars().take(HASH_PREFIX_LEN).collect();
    while prefix.ends_with('-') {
        prefix.pop();
    }
    format!("{prefix}-{:08x}", fnv32a(input.as_bytes()))
}

/// 32-bit FNV-1a over the raw input bytes.
fn fnv32a(bytes: &[u8]) -> u32 {
    const OFFSET_BASIS: u32 = 0x811c_9dc5;
    const PRIME: u32 = 0x0100_0193;
    bytes.iter().fold(OFFSET_BASIS, |hash, byte| {
        (hash ^ u32::from(*byte)).wrapping_mul(PRIME)
    })
}
