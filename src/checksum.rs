use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};

use crate::error::TransferError;

/// Digest algorithms the engine can compute incrementally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChecksumAlgorithm {
    Sha256,
    Sha512,
}

impl ChecksumAlgorithm {
    /// Parse an algorithm name as found in product metadata. Tolerant of
    /// case and of a dash between family and width ("SHA-256", "sha256").
    pub fn parse(name: &str) -> Result<Self, TransferError> {
        match name.trim().to_ascii_lowercase().replace('-', "").as_str() {
            "sha256" => Ok(Self::Sha256),
            "sha512" => Ok(Self::Sha512),
            other => Err(TransferError::UnsupportedChecksum(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sha256 => "SHA-256",
            Self::Sha512 => "SHA-512",
        }
    }
}

/// Incremental digest over the bytes actually delivered to the consumer.
pub struct ProductDigest {
    inner: DigestInner,
}

enum DigestInner {
    Sha256(Sha256),
    Sha512(Sha512),
}

impl ProductDigest {
    pub fn new(algorithm: ChecksumAlgorithm) -> Self {
        let inner = match algorithm {
            ChecksumAlgorithm::Sha256 => DigestInner::Sha256(Sha256::new()),
            ChecksumAlgorithm::Sha512 => DigestInner::Sha512(Sha512::new()),
        };
        Self { inner }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        match &mut self.inner {
            DigestInner::Sha256(h) => h.update(bytes),
            DigestInner::Sha512(h) => h.update(bytes),
        }
    }

    /// Hex-encoded final digest.
    pub fn finalize(self) -> String {
        match self.inner {
            DigestInner::Sha256(h) => hex::encode(h.finalize()),
            DigestInner::Sha512(h) => hex::encode(h.finalize()),
        }
    }
}

/// Case-insensitive comparison of two hex digests.
pub fn digests_match(expected: &str, computed: &str) -> bool {
    expected.eq_ignore_ascii_case(computed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_algorithm_spellings() {
        assert_eq!(
            ChecksumAlgorithm::parse("SHA-256").expect("parse"),
            ChecksumAlgorithm::Sha256
        );
        assert_eq!(
            ChecksumAlgorithm::parse("sha512").expect("parse"),
            ChecksumAlgorithm::Sha512
        );
        assert!(ChecksumAlgorithm::parse("md5").is_err());
    }

    #[test]
    fn incremental_digest_matches_one_shot() {
        let mut digest = ProductDigest::new(ChecksumAlgorithm::Sha256);
        digest.update(b"hello ");
        digest.update(b"world");
        let incremental = digest.finalize();

        let one_shot = hex::encode(Sha256::digest(b"hello world"));
        assert!(digests_match(&one_shot, &incremental));
    }

    #[test]
    fn digest_comparison_ignores_case() {
        assert!(digests_match("ABCDEF", "abcdef"));
        assert!(!digests_match("abcdef", "abcde0"));
    }
}
