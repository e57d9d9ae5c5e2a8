//! Error types for the service smoke-test harness.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for smoke-test operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The service could not be started.
    #[error("failed to launch service at {service}: {reason}")]
    Launch { service: PathBuf, reason: String },

    /// The service could not be stopped cleanly.
    #[error("failed to tear down service at {service}: {reason}")]
    Teardown { service: PathBuf, reason: String },

    /// The block run against the live service failed.
    #[error("block failed while service was live: {0}")]
    Block(String),

    /// Harness configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns true for launch failures.
    pub fn is_launch(&self) -> bool {
        matches!(self, Error::Launch { .. })
    }

    /// Returns true for teardown failures.
    pub fn is_teardown(&self) -> bool {
        matches!(self, Error::Teardown { .. })
    }
}

/// Result type alias for smoke-test operations.
pub type Result<T> = std::result::Result<T, Error>;
