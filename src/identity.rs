//! Path identity
//!
//! FileRecords are addressed by a hash of their normalized, environment-relative path.
//! The hash is cheap and stateless, which makes it a good cache key and URL segment, but it
//! changes whenever a file is renamed or moved. Durable metadata (tags) therefore hangs off
//! a second, rename-invariant identifier, see [`crate::model::Entity`].

use crate::error::ApiError;
use rand::distributions::Alphanumeric;
use rand::Rng;
use unicode_normalization::UnicodeNormalization;

/// Width of a file hash in hex characters
pub const FILE_HASH_LEN: usize = 16;

/// Length of generated short ids
pub const SHORT_ID_LEN: usize = 10;

/// Normalize an environment-relative path.
///
/// Produces a `/`-rooted, `/`-separated, NFC-normalized path with `.` and `..` resolved
/// lexically. A `..` that would climb above the environment root is rejected.
pub fn normalize_path(path: &str) -> Result<String, ApiError> {
    let unified: String = path.replace('\\', "/").nfc().collect();
    let mut parts: Vec<&str> = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if parts.pop().is_none() {
                    return Err(ApiError::Validation(format!(
                        "Path escapes the environment root: {}",
                        path
                    )));
                }
            }
            other => parts.push(other),
        }
    }
    Ok(format!("/{}", parts.join("/")))
}

/// Hash a normalized path into a fixed-width cache key.
pub fn path_hash(normalized: &str) -> String {
    let digest = blake3::hash(normalized.as_bytes());
    let mut encoded = hex::encode(digest.as_bytes());
    encoded.truncate(FILE_HASH_LEN);
    encoded
}

/// Parent of a normalized path. The root is its own parent.
pub fn parent_path(normalized: &str) -> String {
    match normalized.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => normalized[..idx].to_string(),
    }
}

/// Last segment of a normalized path; empty for the root.
pub fn base_name(normalized: &str) -> &str {
    normalized.rsplit('/').next().unwrap_or("")
}

/// Join a child name onto a normalized directory path.
pub fn join(dir: &str, name: &str) -> String {
    if dir == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", dir, name)
    }
}

/// Generate a random alphanumeric short id.
pub fn new_short_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SHORT_ID_LEN)
        .map(char::from)
        .collect()
}
