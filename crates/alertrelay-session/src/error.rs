//! Error types for session operations.

use thiserror::Error;

/// Errors a session may report for a command.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The command needs a live connection.
    #[error("session not connected")]
    NotConnected,

    /// Transport-level failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The session has shut down for good.
    #[error("session closed")]
    Closed,
}

/// Result type for session operations.
pub type Result<T> = std::result::Result<T, SessionError>;
