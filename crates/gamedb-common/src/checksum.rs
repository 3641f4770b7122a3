//! Checksum utilities for staged payloads
//!
//! Payloads are written to staging in chunks, so the digest is built up
//! incrementally as each chunk passes through.

use crate::error::{GamedbError, Result};
use sha2::{Digest, Sha256};

/// Incremental SHA-256 over a chunked byte stream
#[derive(Debug, Clone, Default)]
pub struct StreamingChecksum {
    hasher: Sha256,
    bytes: u64,
}

impl StreamingChecksum {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
        self.bytes += chunk.len() as u64;
    }

    /// Number of bytes fed so far
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Finish and return `(hex digest, total bytes)`
    pub fn finalize(self) -> (String, u64) {
        (hex::encode(self.hasher.finalize()), self.bytes)
    }
}

/// SHA-256 of a complete buffer, hex encoded
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Verify a buffer against an expected hex digest
pub fn verify_sha256(data: &[u8], expected: &str) -> Result<()> {
    let actual = sha256_hex(data);
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(GamedbError::ChecksumMismatch {
            expected: expected.to_string(),
            actual,
        })
    }
}
