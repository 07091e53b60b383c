//! Error types for Beacon.
//!
//! Send-path failures are not errors: `Transport::send` always resolves to a
//! `SendOutcome`. These types cover construction and configuration.

use thiserror::Error;

/// Main error type for Beacon operations.
#[derive(Error, Debug)]
pub enum BeaconError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// DSN parsing errors
    #[error("Invalid DSN: {0}")]
    Dsn(String),

    /// HTTP client construction errors
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// Payload serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for BeaconError {
    fn from(err: config::ConfigError) -> Self {
        BeaconError::Config(err.to_string())
    }
}

/// Result type alias for Beacon operations.
pub type Result<T> = std::result::Result<T, BeaconError>;
