//! Content hashes over canonical descriptor bytes

use sha2::{Digest, Sha256};
use std::fmt;

use crate::codec;
use crate::error::Result;
use crate::schema::BlockDescriptor;

/// SHA256 digest of a descriptor's canonical encoding
///
/// Because encoding is deterministic, equal descriptors always hash equal
/// and the hash can serve as a cache key for the descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash(String);

impl ContentHash {
    /// Compute the hash of raw bytes
    pub fn from_bytes(data: &[u8]) -> Self {
        let hash = Sha256::digest(data);
        Self(format!("{:x}", hash))
    }

    /// Compute the hash of a descriptor's canonical encoding
    pub fn of(descriptor: &BlockDescriptor) -> Result<Self> {
        Ok(Self::from_bytes(&codec::encode(descriptor)?))
    }

    /// Get the hex string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Verify that content matches this hash
    pub fn verify(&self, content: &[u8]) -> bool {
        Self::from_bytes(content) == *self
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl BlockDescriptor {
    /// Hash of this descriptor's canonical encoding
    pub fn content_hash(&self) -> Result<ContentHash> {
        ContentHash::of(self)
    }
}
