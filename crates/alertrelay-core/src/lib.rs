//! # Alert Relay Core
//!
//! Pure primitives for the alert relay: which channels the relay wants to
//! be in, and what it currently knows about each of them.
//!
//! This crate contains no I/O, no timers, no networking.
//!
//! ## Key Types
//!
//! - [`ChannelName`] - Case-insensitive channel identifier
//! - [`ChannelSpec`] - A desired channel with its optional join key
//! - [`ChannelStatus`] - `NotJoined`, `JoinPending` or `Joined`
//! - [`ChannelSnapshot`] - Read-only view of one channel's membership
//! - [`ReconcilerConfig`] - Desired channel set and retry delay

pub mod channel;
pub mod config;
pub mod error;
pub mod status;

pub use channel::{ChannelName, ChannelSpec, CHANNEL_PREFIXES};
pub use config::{ReconcilerConfig, DEFAULT_RETRY_DELAY};
pub use error::{ConfigError, Result};
pub use status::{ChannelSnapshot, ChannelStatus};
