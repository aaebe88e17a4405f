//! Reconciler configuration.
//!
//! Loading the relay's configuration document is somebody else's job; this
//! module only describes and validates the part the reconciler consumes.

use std::collections::HashSet;
use std::time::Duration;

use crate::channel::ChannelSpec;
use crate::error::{ConfigError, Result};

/// Delay between join attempts when no confirmation arrives.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Configuration for the channel reconciler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilerConfig {
    /// Channels to keep joined, in join order.
    pub channels: Vec<ChannelSpec>,
    /// Fixed interval between unconfirmed join attempts.
    pub retry_delay: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            channels: Vec::new(),
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl ReconcilerConfig {
    /// Create a configuration for the given channels with the default delay.
    pub fn new(channels: Vec<ChannelSpec>) -> Self {
        Self {
            channels,
            ..Self::default()
        }
    }

    /// Add a channel.
    pub fn with_channel(mut self, channel: ChannelSpec) -> Self {
        self.channels.push(channel);
        self
    }

    /// Set the retry delay.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Check the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        if self.channels.is_empty() {
            return Err(ConfigError::NoChannels);
        }
        if self.retry_delay.is_zero() {
            return Err(ConfigError::ZeroRetryDelay);
        }

        let mut seen = HashSet::with_capacity(self.channels.len());
        for channel in &self.channels {
            channel.name.validate()?;
            if !seen.insert(&channel.name) {
                return Err(ConfigError::DuplicateChannel(channel.name.to_string()));
            }
        }
        Ok(())
    }
}
