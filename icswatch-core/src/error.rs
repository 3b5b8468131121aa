//! Error types for the icswatch ecosystem.

use thiserror::Error;
use tracing::error;

/// Errors that can occur in icswatch operations.
#[derive(Error, Debug)]
pub enum IcsWatchError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("State file error: {0}")]
    StateIo(String),

    #[error("ICS parse error: {0}")]
    Parse(String),

    #[error("Invalid recurrence rule: {0}")]
    Recurrence(String),

    #[error("Notification error: {0}")]
    Notify(String),

    #[error("Internal invariant violated: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for icswatch operations.
pub type IcsWatchResult<T> = Result<T, IcsWatchError>;

/// Report a violated internal invariant: a bug in this crate, never bad
/// input. Panics in debug builds; logs and returns the error in release
/// builds so the daemon keeps ticking.
pub fn internal_invariant(message: impl Into<String>) -> IcsWatchError {
    let message = message.into();
    if cfg!(debug_assertions) {
        panic!("internal invariant violated: {message}");
    }
    error!(%message, "internal invariant violated");
    IcsWatchError::Internal(message)
}
