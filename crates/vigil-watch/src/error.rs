//! Error types for the watcher daemon.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while watching the feed.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Connecting or subscribing to the upstream feed failed.
    #[error("connect failed: {0}")]
    Connect(String),

    /// The live feed stream faulted or was closed by the upstream.
    #[error("feed stream error: {0}")]
    Feed(String),

    /// Notification delivery error.
    #[error("notification error: {0}")]
    Notify(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}
