//! Integrity: SHA-256 digest of a whole artifact, reported on both ends of a transfer.

use std::fmt::Write;

use sha2::{Digest, Sha256};

/// Hash an artifact. Returns 32-byte digest.
pub fn hash_artifact(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

/// Lowercase hex SHA-256 of an artifact, for display and logs.
pub fn digest_hex(bytes: &[u8]) -> String {
    hash_artifact(bytes)
        .iter()
        .fold(String::with_capacity(64), |mut out, b| {
            let _ = write!(out, "{b:02x}");
            out
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_digest() {
        assert_eq!(
            digest_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn digest_changes_with_content() {
        assert_ne!(digest_hex(b"hello chunk"), digest_hex(b"tampered"));
        assert_eq!(digest_hex(b"abc").len(), 64);
    }
}
