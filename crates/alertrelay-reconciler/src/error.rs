//! Error types for the reconciler.

use alertrelay_core::ConfigError;
use thiserror::Error;

/// Errors reported to callers of the reconciler.
///
/// Failures inside the reconcile loop never surface here; they are logged
/// and retried. Only configuration and lifecycle misuse do.
#[derive(Debug, Error)]
pub enum ReconcilerError {
    /// The configuration failed validation.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// `start` was called on a reconciler that was already started.
    #[error("reconciler already started")]
    AlreadyStarted,

    /// `stop` was called before `start`.
    #[error("reconciler not started")]
    NotStarted,

    /// `stop` was called after a completed stop.
    #[error("reconciler already stopped")]
    AlreadyStopped,

    /// The worker task ended abnormally.
    #[error("reconciler worker failed: {0}")]
    WorkerFailed(String),

    /// The channel is not part of the desired set.
    #[error("unknown channel: {0}")]
    UnknownChannel(String),

    /// The reconciler is no longer publishing membership updates.
    #[error("reconciler not running")]
    NotRunning,
}

/// Result type for reconciler operations.
pub type Result<T> = std::result::Result<T, ReconcilerError>;
