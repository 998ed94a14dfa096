//! Content digests for pre-split and split frame metadata rows.

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of `bytes`, used as the durable `digest` field on
/// pre-split and split frame metadata so two recordings fed identical byte
/// streams can be compared without storing the bytes themselves.
pub fn content_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_deterministic() {
        let bytes = vec![1u8, 2, 3, 4];
        assert_eq!(content_digest(&bytes), content_digest(&bytes));
    }

    #[test]
    fn digest_differs_for_different_bytes() {
        assert_ne!(content_digest(&[1, 2, 3]), content_digest(&[1, 2, 4]));
    }
}
