//! Settings error types.

use thiserror::Error;

/// Errors raised while resolving settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// A settings value was invalid (e.g., out of range).
    #[error("invalid settings value: {0}")]
    InvalidValue(String),
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;
