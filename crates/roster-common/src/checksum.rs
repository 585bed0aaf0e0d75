//! SHA-256 helpers for staged archives
//!
//! [`Sha256Digest`] is fed chunk by chunk while a download streams to disk,
//! so the archive never has to be re-read just to fingerprint it.

use crate::error::{CommonError, Result};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

/// Incremental SHA-256 over a byte stream
#[derive(Default, Clone)]
pub struct Sha256Digest {
    hasher: Sha256,
    bytes: u64,
}

impl Sha256Digest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
        self.bytes += chunk.len() as u64;
    }

    /// Number of bytes hashed so far
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Consume the digest and return the lowercase hex encoding
    pub fn finalize_hex(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

/// Compute the SHA-256 of any readable source
pub fn compute_sha256<R: Read>(reader: &mut R) -> Result<String> {
    let mut digest = Sha256Digest::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        digest.update(&buffer[..bytes_read]);
    }

    Ok(digest.finalize_hex())
}

/// Compute the SHA-256 of a file on disk
pub fn compute_file_sha256(path: impl AsRef<Path>) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    compute_sha256(&mut file)
}

/// Normalize a user-supplied checksum (trim, lowercase) and check its shape
pub fn normalize_sha256(raw: &str) -> Result<String> {
    let normalized = raw.trim().to_ascii_lowercase();
    if normalized.len() != 64 || !normalized.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(CommonError::InvalidChecksum(raw.to_string()));
    }
    Ok(normalized)
}

/// Compare an actual digest against the expected one
pub fn verify_sha256(expected: &str, actual: &str) -> Result<()> {
    if expected.eq_ignore_ascii_case(actual) {
        Ok(())
    } else {
        Err(CommonError::ChecksumMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    const HELLO_WORLD_SHA256: &str =
        "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    #[test]
    fn test_compute_sha256() {
        let mut cursor = Cursor::new(b"hello world");
        assert_eq!(compute_sha256(&mut cursor).unwrap(), HELLO_WORLD_SHA256);
    }

    #[test]
    fn test_incremental_matches_whole() {
        let mut digest = Sha256Digest::new();
        digest.update(b"hello ");
        digest.update(b"world");
        assert_eq!(digest.bytes(), 11);
        assert_eq!(digest.finalize_hex(), HELLO_WORLD_SHA256);
    }

    #[test]
    fn test_compute_file_sha256() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"hello world").unwrap();
        assert_eq!(compute_file_sha256(file.path()).unwrap(), HELLO_WORLD_SHA256);
    }

    #[test]
    fn test_normalize_sha256() {
        let upper = HELLO_WORLD_SHA256.to_uppercase();
        assert_eq!(normalize_sha256(&format!("  {upper} ")).unwrap(), HELLO_WORLD_SHA256);
        assert!(normalize_sha256("abc").is_err());
        assert!(normalize_sha256(&"z".repeat(64)).is_err());
    }

    #[test]
    fn test_verify_sha256_mismatch() {
        assert!(verify_sha256(HELLO_WORLD_SHA256, HELLO_WORLD_SHA256).is_ok());
        match verify_sha256(HELLO_WORLD_SHA256, "deadbeef") {
            Err(CommonError::ChecksumMismatch { expected, actual }) => {
                assert_eq!(expected, HELLO_WORLD_SHA256);
                assert_eq!(actual, "deadbeef");
            },
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
