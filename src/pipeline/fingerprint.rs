//! Content fingerprinting for duplicate detection.

use sha2::{Digest, Sha256};

/// Default ceiling above which content is not hashed interactively.
pub const DEFAULT_HASH_CEILING_BYTES: u64 = 20 * 1024 * 1024;

/// Outcome of a fingerprinting attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FingerprintOutcome {
    /// SHA-256 hex digest of the full content.
    Digest(String),
    /// Content was too large to hash interactively (or unreadable).
    /// Duplicate detection degrades to filename matching.
    Indeterminate,
}

impl FingerprintOutcome {
    pub fn digest(&self) -> Option<&str> {
        match self {
            Self::Digest(d) => Some(d),
            Self::Indeterminate => None,
        }
    }
}

/// Computes content digests for assets under a size ceiling.
///
/// Pure over its input; hashing a very large file would stall an interactive
/// flow, so anything over the ceiling is reported Indeterminate instead.
#[derive(Debug, Clone)]
pub struct Fingerprinter {
    hash_ceiling_bytes: u64,
}

impl Fingerprinter {
    pub fn new(hash_ceiling_bytes: u64) -> Self {
        Self { hash_ceiling_bytes }
    }

    pub fn hash_ceiling_bytes(&self) -> u64 {
        self.hash_ceiling_bytes
    }

    /// Fingerprint a payload. CPU-bound; callers schedule this off the
    /// interaction-critical path.
    pub fn fingerprint(&self, data: &[u8]) -> FingerprintOutcome {
        if data.len() as u64 > self.hash_ceiling_bytes {
            return FingerprintOutcome::Indeterminate;
        }
        FingerprintOutcome::Digest(sha256_hex(data))
    }
}

impl Default for Fingerprinter {
    fn default() -> Self {
        Self::new(DEFAULT_HASH_CEILING_BYTES)
    }
}

/// SHA-256 hex digest of a byte slice.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_is_deterministic() {
        let fp = Fingerprinter::new(1024);
        let a = fp.fingerprint(b"same content");
        let b = fp.fingerprint(b"same content");
        assert_eq!(a, b);
        assert!(matches!(a, FingerprintOutcome::Digest(_)));
    }

    #[test]
    fn test_different_content_different_digest() {
        let fp = Fingerprinter::new(1024);
        let a = fp.fingerprint(b"content a");
        let b = fp.fingerprint(b"content b");
        assert_ne!(a, b);
    }

    #[test]
    fn test_known_digest() {
        // SHA-256 of the empty string
        let fp = Fingerprinter::new(1024);
        assert_eq!(
            fp.fingerprint(b"").digest(),
            Some("e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855")
        );
    }

    #[test]
    fn test_over_ceiling_is_indeterminate() {
        let fp = Fingerprinter::new(8);
        assert_eq!(
            fp.fingerprint(b"123456789"),
            FingerprintOutcome::Indeterminate
        );
        // At the ceiling still hashes
        assert!(matches!(
            fp.fingerprint(b"12345678"),
            FingerprintOutcome::Digest(_)
        ));
    }
}
