// src/hash.rs

//! SHA-256 helpers for content-derived cache keys.
//!
//! Cache keys are lowercase hex SHA-256 digests (64 characters). Keys are a
//! pure function of their inputs and never depend on filesystem state, so a
//! rebuilt source with unchanged inputs reuses its cached artifact.

use sha2::{Digest, Sha256};

/// Compute the lowercase hex SHA-256 digest of a byte slice.
pub fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Incremental SHA-256 hasher producing a lowercase hex digest.
#[derive(Default)]
pub struct Sha256Hasher {
    state: Sha256,
}

impl Sha256Hasher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed more data into the digest.
    pub fn update(&mut self, data: &[u8]) {
        self.state.update(data);
    }

    /// Consume the hasher and return the hex digest.
    pub fn finalize_hex(self) -> String {
        format!("{:x}", self.state.finalize())
    }
}
