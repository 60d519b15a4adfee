//! Error types for Turnstile.

use thiserror::Error;

/// Main error type for Turnstile operations.
#[derive(Error, Debug)]
pub enum TurnstileError {
    /// Invalid policy or settings. Raised before any store mutation.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The backing window store could not be reached
    #[error("Window store unavailable: {0}")]
    StoreUnavailable(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TurnstileError {
    /// Returns `true` for errors caused by the backing store rather than the caller.
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, TurnstileError::StoreUnavailable(_))
    }
}

impl From<config::ConfigError> for TurnstileError {
    fn from(err: config::ConfigError) -> Self {
        TurnstileError::Configuration(err.to_string())
    }
}

/// Result type alias for Turnstile operations.
pub type Result<T> = std::result::Result<T, TurnstileError>;
