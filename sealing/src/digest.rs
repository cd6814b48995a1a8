//! SHA-256 content digests.
//!
//! The digest of a persisted artifact is always computed from the bytes
//! read back off disk, so a corrupted write is caught before the digest
//! becomes the record's integrity anchor.

use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::SealResult;

/// Hex-encoded SHA-256 of an in-memory buffer.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Hex-encoded SHA-256 of a file's persisted bytes.
pub async fn file_sha256_hex(path: &Path) -> SealResult<String> {
    let bytes = tokio::fs::read(path).await?;
    Ok(sha256_hex(&bytes))
}
