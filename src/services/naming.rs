//! Content addressing and naming.
//!
//! Produces the storage key and integrity hash for arbitrary upload bytes.
//! Keys stay human-traceable (owner, timestamp, original name slice); the
//! hash stays content-only so it can be used for deduplication and tamper
//! detection independent of where the object lives.

use crate::models::file_record::FileCategory;
use chrono::Utc;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Number of random bytes appended to every storage name. At 16 bytes the
/// random component alone makes same-millisecond collisions implausible.
const RANDOM_SUFFIX_BYTES: usize = 16;

/// Character budget for the sanitized slice of the original filename.
const MAX_BASENAME_CHARS: usize = 32;

/// Derive a collision-resistant storage key for an upload.
///
/// The key combines the owner id, a wall-clock millisecond timestamp, a
/// random hex suffix, and a sanitized, length-capped slice of the original
/// base filename, preserving the original extension. Two calls in the same
/// millisecond from the same owner never collide; the random suffix
/// dominates.
pub fn generate_storage_name(original_name: &str, owner_id: &str) -> String {
    let timestamp = Utc::now().timestamp_millis();

    let mut suffix = [0u8; RANDOM_SUFFIX_BYTES];
    rand::thread_rng().fill_bytes(&mut suffix);
    let suffix_hex = suffix
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<String>();

    let path = Path::new(original_name);
    let stem = sanitize_component(
        path.file_stem().and_then(|s| s.to_str()).unwrap_or("file"),
        MAX_BASENAME_CHARS,
    );
    let stem = if stem.is_empty() {
        "file".to_string()
    } else {
        stem
    };
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .map(|e| sanitize_component(e, 16))
        .filter(|e| !e.is_empty());

    let owner = sanitize_component(owner_id, 64);
    let owner = if owner.is_empty() {
        "anonymous".to_string()
    } else {
        owner
    };

    match ext {
        Some(ext) => format!("{owner}/{timestamp}-{suffix_hex}-{stem}.{ext}"),
        None => format!("{owner}/{timestamp}-{suffix_hex}-{stem}"),
    }
}

/// SHA-256 digest over the exact bytes received, lowercase hex.
pub fn content_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Pure mapping from MIME type to coarse category.
pub fn classify(mime_type: &str) -> FileCategory {
    let mime = mime_type.to_ascii_lowercase();
    if mime.starts_with("image/") {
        FileCategory::Image
    } else if mime.starts_with("video/") {
        FileCategory::Video
    } else if ["pdf", "msword", "doc", "docx", "word", "excel"]
        .iter()
        .any(|hint| mime.contains(hint))
    {
        FileCategory::Document
    } else {
        FileCategory::Other
    }
}

/// Strip a name component down to alphanumerics plus `-` and `_`, capped at
/// `max_chars`.
fn sanitize_component(value: &str, max_chars: usize) -> String {
    value
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .take(max_chars)
        .collect()
}
