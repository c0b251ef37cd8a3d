//! Checksums.

use sha2::{Digest, Sha256};

/// Hex SHA-256 of a string.
pub fn sha256_str(data: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.as_bytes());
    format!("{:x}", hasher.finalize())
}
