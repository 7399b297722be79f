//! Content-hash computation for the blob engine's dedup branch
//! (`spec.md` §4.5 step 3, §3 "Index record — hash entry").
//!
//! The original Go implementation (`examples/original_source/src/tinynfs/filesystem.go`)
//! hashes every write with SHA-256 and keys the hash namespace on the raw
//! digest bytes; this keeps the same hash algorithm so existing data
//! directories stay byte-compatible.

use sha2::{Digest, Sha256};

/// 32-byte SHA-256 digest of a payload, used as the hash-namespace key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContentHash(pub [u8; 32]);

impl ContentHash {
    pub fn of(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        let digest = hasher.finalize();
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        ContentHash(out)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}
