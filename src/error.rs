//! Error types for switchboard.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for router operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to read or write persisted router state.
    #[error("state error at {path}: {reason}")]
    State { path: PathBuf, reason: String },

    /// IO error during state or transcript operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Wrapper installation or transparent-launch failure.
    #[error("{0}")]
    Wrapper(String),
}

/// Result type alias for router operations.
pub type Result<T> = std::result::Result<T, Error>;
