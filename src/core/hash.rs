//! Domain-Separated Hashing
//!
//! SHA-256 helpers used for:
//! - Nullifier and proof digests
//! - Group Merkle roots
//! - Canvas snapshot hashes (feed consumers detect missed updates)

use sha2::{Sha256, Digest};

/// Hash output type (256 bits / 32 bytes)
pub type Hash32 = [u8; 32];

/// Incremental hasher with a domain separator.
///
/// Order of updates is part of the encoding; every variable-length
/// field is length-prefixed so adjacent fields cannot collide.
pub struct CanvasHasher {
    hasher: Sha256,
}

impl CanvasHasher {
    /// Create a new hasher with domain separator.
    pub fn new(domain: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(domain);
        Self { hasher }
    }

    /// Create hasher for canvas snapshots.
    pub fn for_snapshot() -> Self {
        Self::new(b"TAZ_CANVAS_SNAPSHOT_V1")
    }

    /// Update with raw bytes (fixed width, no length prefix).
    #[inline]
    pub fn update_bytes(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    /// Update with a length-prefixed byte string.
    #[inline]
    pub fn update_var(&mut self, bytes: &[u8]) {
        self.update_u64(bytes.len() as u64);
        self.hasher.update(bytes);
    }

    /// Update with a length-prefixed UTF-8 string.
    #[inline]
    pub fn update_str(&mut self, value: &str) {
        self.update_var(value.as_bytes());
    }

    /// Update with a u8 value.
    #[inline]
    pub fn update_u8(&mut self, value: u8) {
        self.hasher.update([value]);
    }

    /// Update with a u32 value (little-endian).
    #[inline]
    pub fn update_u32(&mut self, value: u32) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with a u64 value (little-endian).
    #[inline]
    pub fn update_u64(&mut self, value: u64) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with a boolean.
    #[inline]
    pub fn update_bool(&mut self, value: bool) {
        self.update_u8(value as u8);
    }

    /// Update with a UUID (16 bytes).
    #[inline]
    pub fn update_uuid(&mut self, uuid: &[u8; 16]) {
        self.hasher.update(uuid);
    }

    /// Finalize and return the hash.
    pub fn finalize(self) -> Hash32 {
        self.hasher.finalize().into()
    }
}

/// Compute a simple hash of arbitrary data.
pub fn hash_bytes(data: &[u8]) -> Hash32 {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Compute hash with domain separator.
pub fn hash_with_domain(domain: &[u8], data: &[u8]) -> Hash32 {
    let mut hasher = Sha256::new();
    hasher.update(domain);
    hasher.update(data);
    hasher.finalize().into()
}

/// Short hex prefix for log fields.
pub fn short_hex(bytes: &[u8]) -> String {
    hex::encode(&bytes[..bytes.len().min(4)])
}
