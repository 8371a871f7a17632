//! SHA-256 digests used throughout the ledger.

use sha2::{Digest, Sha256};

/// Length of a hex-encoded SHA-256 digest.
pub const DIGEST_HEX_LEN: usize = 64;

/// Lowercase hex SHA-256 of `bytes`.
pub fn hash_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

pub fn hash_str(value: &str) -> String {
    hash_bytes(value.as_bytes())
}

/// Incremental SHA-256 over a stream read in chunks.
#[derive(Clone, Default)]
pub struct StreamDigest {
    hasher: Sha256,
}

impl StreamDigest {
    pub fn update(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    /// Lowercase hex digest of everything fed so far.
    pub fn finish(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

/// True if `value` has the shape of a digest produced by [`hash_bytes`].
pub fn is_digest(value: &str) -> bool {
    value.len() == DIGEST_HEX_LEN
        && value
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}
