//! Snapshot Fingerprinting
//!
//! Provides deterministic hashing of room snapshots for:
//! - Detecting re-delivery of a snapshot that was already resolved
//! - Cross-client agreement checks in logs
//!
//! Both clients hash the same fields in the same order, so equal
//! snapshots produce equal fingerprints on every platform.

use sha2::{Sha256, Digest};

/// Hash output type (256 bits / 32 bytes)
pub type StateHash = [u8; 32];

/// Deterministic hasher for snapshot state.
///
/// Wraps SHA-256 with helpers for the primitive fields of a room document.
/// Order of updates is critical for determinism.
pub struct StateHasher {
    hasher: Sha256,
}

impl StateHasher {
    /// Create a new hasher with domain separator.
    pub fn new(domain: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(domain);
        Self { hasher }
    }

    /// Create hasher for the round-relevant part of a room.
    pub fn for_round() -> Self {
        Self::new(b"MUKJJIPPA_ROUND_V1")
    }

    /// Create hasher for a negotiation record.
    pub fn for_proposal() -> Self {
        Self::new(b"MUKJJIPPA_PROPOSAL_V1")
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

    /// Update with a boolean.
    #[inline]
    pub fn update_bool(&mut self, value: bool) {
        self.update_u8(value as u8);
    }

    /// Update with an optional tag byte. `None` hashes as 0xFF.
    #[inline]
    pub fn update_tag(&mut self, tag: Option<u8>) {
        self.update_u8(tag.unwrap_or(0xFF));
    }

    /// Update with a length-prefixed string.
    pub fn update_str(&mut self, value: &str) {
        self.update_u32(value.len() as u32);
        self.hasher.update(value.as_bytes());
    }

    /// Finalize and return the hash.
    pub fn finalize(self) -> StateHash {
        self.hasher.finalize().into()
    }
}

/// First eight bytes of a hash, hex encoded. Used in log lines.
pub fn short_hex(hash: &StateHash) -> String {
    hex::encode(&hash[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_hasher_determinism() {
        let make_hash = || {
            let mut hasher = StateHasher::for_round();
            hasher.update_u32(3);
            hasher.update_tag(Some(1));
            hasher.update_tag(None);
            hasher.update_bool(true);
            hasher.update_str("ABCDEF");
            hasher.finalize()
        };

        assert_eq!(make_hash(), make_hash());
    }

    #[test]
    fn test_hash_order_matters() {
        let hash1 = {
            let mut h = StateHasher::new(b"test");
            h.update_u32(1);
            h.update_u32(2);
            h.finalize()
        };

        let hash2 = {
            let mut h = StateHasher::new(b"test");
            h.update_u32(2);
            h.update_u32(1);
            h.finalize()
        };

        assert_ne!(hash1, hash2);
    }

    #[test]
    fn test_domain_separation() {
        let round = StateHasher::for_round().finalize();
        let proposal = StateHasher::for_proposal().finalize();
        assert_ne!(round, proposal);
    }

    #[test]
    fn test_missing_tag_differs_from_zero() {
        let mut a = StateHasher::new(b"t");
        a.update_tag(None);
        let mut b = StateHasher::new(b"t");
        b.update_tag(Some(0));

        assert_ne!(a.finalize(), b.finalize());
    }

    #[test]
    fn test_short_hex() {
        let hash = [0xABu8; 32];
        assert_eq!(short_hex(&hash), "abababababababab");
    }
}
