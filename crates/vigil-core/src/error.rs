//! Error types shared across the vigil crates.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the core types.
#[derive(Error, Debug)]
pub enum Error {
    /// Payload validation error: the value does not match any known event
    /// shape, or a required field is missing or empty.
    #[error("Validation error: {0}")]
    Validation(String),
}
