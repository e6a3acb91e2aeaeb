//! Error types for the DDNS update agent
//!
//! Per-account update failures are not errors: they are reported as
//! [`crate::outcome::UpdateOutcome::Failed`] so a cycle can always be
//! summarized. The variants here cover everything that stops an operation.

use thiserror::Error;

/// Result type alias for DDNS operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the DDNS update agent
#[derive(Error, Debug)]
pub enum Error {
    /// Every IP resolution service failed
    #[error("IP resolution failed: {0}")]
    Resolution(String),

    /// Last known IP could not be read or written
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Missing or malformed configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(String),

    /// Notification delivery errors
    #[error("Notification error: {0}")]
    Notify(String),
}

impl Error {
    /// Create a resolution error
    pub fn resolution(msg: impl Into<String>) -> Self {
        Self::Resolution(msg.into())
    }

    /// Create a persistence error
    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an HTTP error
    pub fn http(msg: impl Into<String>) -> Self {
        Self::Http(msg.into())
    }

    /// Create a notification error
    pub fn notify(msg: impl Into<String>) -> Self {
        Self::Notify(msg.into())
    }
}
