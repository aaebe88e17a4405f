//! Session abstraction consumed by the reconciler.
//!
//! Implementations wrap a live chat connection. They must be thread-safe:
//! the reconciler shares the session with whatever else sends commands
//! on it.

use async_trait::async_trait;
use tokio::sync::broadcast;

use alertrelay_core::ChannelName;

use crate::error::Result;

/// Capacity of the event broadcast channel used by [`crate::MemorySession`].
pub const EVENT_BUFFER: usize = 256;

/// Protocol and lifecycle events a session reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The session registered with the server and accepts commands.
    Connected,
    /// The connection was lost or closed.
    Disconnected,
    /// The server confirmed this session joined `channel`.
    JoinConfirmed { channel: ChannelName },
    /// `target` was forcibly removed from `channel`.
    Kicked { channel: ChannelName, target: String },
}

/// A chat session the reconciler issues commands through.
///
/// Delivery of [`SessionEvent`]s is at-least-once. Lifecycle events bracket
/// the protocol events of the connection they belong to; nothing stronger
/// is promised about ordering.
#[async_trait]
pub trait Session: Send + Sync {
    /// Establish the connection.
    async fn connect(&self) -> Result<()>;

    /// Close the connection with a quit reason.
    async fn disconnect(&self, reason: &str) -> Result<()>;

    /// Send a join command for `channel`.
    ///
    /// Success means the command was handed to the transport, not that the
    /// server accepted it; acceptance arrives as [`SessionEvent::JoinConfirmed`].
    async fn send_join(&self, channel: &ChannelName, key: Option<&str>) -> Result<()>;

    /// Subscribe to session events from this point on.
    fn subscribe(&self) -> broadcast::Receiver<SessionEvent>;

    /// Whether the session is currently registered.
    fn is_connected(&self) -> bool;

    /// The nickname this session is known by on the server.
    fn nickname(&self) -> String;
}
