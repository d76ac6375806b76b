//! Content fingerprint for blocks.
//!
//! A cheap change marker, not a security boundary: the store compares it to
//! detect that a block moved underneath a session.

use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of the UTF-8 content.
pub fn content_hash(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_digest() {
        assert_eq!(
            content_hash(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn differs_by_content() {
        assert_ne!(content_hash("x"), content_hash("y"));
        assert_eq!(content_hash("x"), content_hash("x"));
    }
}
