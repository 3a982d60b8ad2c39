//! Match Codes
//!
//! Short human-shareable identifiers used to address a room document.
//! Drawn uniformly from an alphabet without visually confusable
//! characters (no `0`/`O`, `1`/`I`).

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Characters a generated code may contain.
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Default code length.
pub const CODE_LENGTH: usize = 6;

/// Address of a room document.
///
/// Always stored upper-cased so that codes typed by hand in lower case
/// resolve to the same document.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MatchCode(String);

impl MatchCode {
    /// Generate a fresh random code of `len` characters.
    pub fn generate<R: Rng + ?Sized>(rng: &mut R, len: usize) -> Self {
        let code = (0..len)
            .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
            .collect();
        Self(code)
    }

    /// Parse user input into a code.
    ///
    /// Surrounding whitespace is trimmed and letters are upper-cased.
    /// Only the length and ASCII-alphanumeric shape are checked; codes
    /// minted by other clients may use characters outside [`CODE_ALPHABET`].
    pub fn parse(input: &str, len: usize) -> Result<Self, CodeError> {
        let normalized = input.trim().to_ascii_uppercase();

        if normalized.chars().count() != len {
            return Err(CodeError::WrongLength {
                expected: len,
                actual: normalized.chars().count(),
            });
        }

        if let Some(bad) = normalized.chars().find(|c| !c.is_ascii_alphanumeric()) {
            return Err(CodeError::InvalidCharacter(bad));
        }

        Ok(Self(normalized))
    }

    /// The code as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MatchCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Malformed code input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodeError {
    /// Code has the wrong number of characters.
    #[error("match code must be {expected} characters, got {actual}")]
    WrongLength {
        /// Required length.
        expected: usize,
        /// Length supplied.
        actual: usize,
    },

    /// Code contains a non-alphanumeric character.
    #[error("invalid character in match code: {0:?}")]
    InvalidCharacter(char),
}
