//! Session configuration.

use crate::core::code::CODE_LENGTH;

/// Tunables for a client session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Code generation attempts before giving up on `create`.
    pub max_create_attempts: u32,
    /// Length of generated and accepted room codes.
    pub code_length: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_create_attempts: 5,
            code_length: CODE_LENGTH,
        }
    }
}

impl SessionConfig {
    /// Load from environment variables, falling back to defaults.
    ///
    /// - `MUKJJIPPA_CREATE_ATTEMPTS`
    /// - `MUKJJIPPA_CODE_LENGTH`
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_create_attempts: std::env::var("MUKJJIPPA_CREATE_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|&n| n > 0)
                .unwrap_or(defaults.max_create_attempts),
            code_length: std::env::var("MUKJJIPPA_CODE_LENGTH")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|&n| n > 0)
                .unwrap_or(defaults.code_length),
        }
    }
}
