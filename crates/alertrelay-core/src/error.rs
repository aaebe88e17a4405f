//! Error types for the Alert Relay Core.

use thiserror::Error;

/// Errors found while validating a reconciler configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("no channels configured")]
    NoChannels,

    #[error("channel name is empty")]
    EmptyChannelName,

    #[error("invalid channel name: {0}")]
    InvalidChannelName(String),

    #[error("channel configured more than once: {0}")]
    DuplicateChannel(String),

    #[error("retry delay must be greater than zero")]
    ZeroRetryDelay,
}

/// Result type for configuration validation.
pub type Result<T> = std::result::Result<T, ConfigError>;
