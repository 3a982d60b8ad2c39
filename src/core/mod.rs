//! Core deterministic primitives.
//!
//! Match-code minting and snapshot fingerprinting. Fingerprints must be
//! identical on both clients for identical snapshots.

pub mod code;
pub mod hash;

// Re-export core types
pub use code::{MatchCode, CodeError, CODE_ALPHABET, CODE_LENGTH};
pub use hash::{StateHash, StateHasher, short_hex};
