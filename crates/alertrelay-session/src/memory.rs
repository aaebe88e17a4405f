//! In-memory session for tests.
//!
//! Commands are recorded on an mpsc channel the test holds; events are
//! injected with [`MemorySession::emit`] and fanned out to subscribers
//! through a broadcast channel, the same way a real session would.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use alertrelay_core::ChannelName;

use crate::error::{Result, SessionError};
use crate::session::{Session, SessionEvent, EVENT_BUFFER};

/// A command a [`MemorySession`] received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    Connect,
    Disconnect { reason: String },
    Join { channel: ChannelName, key: Option<String> },
}

/// In-memory session implementation.
pub struct MemorySession {
    nickname: RwLock<String>,
    connected: AtomicBool,
    fail_sends: AtomicBool,
    events: broadcast::Sender<SessionEvent>,
    commands: mpsc::UnboundedSender<SessionCommand>,
}

impl MemorySession {
    /// Create a disconnected session and the receiver of its command log.
    pub fn new(nickname: &str) -> (Arc<Self>, mpsc::UnboundedReceiver<SessionCommand>) {
        let (commands, rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let session = Arc::new(Self {
            nickname: RwLock::new(nickname.to_string()),
            connected: AtomicBool::new(false),
            fail_sends: AtomicBool::new(false),
            events,
            commands,
        });
        (session, rx)
    }

    /// Inject an event as if the server had produced it.
    ///
    /// Lifecycle events also update the connection state.
    pub fn emit(&self, event: SessionEvent) {
        match event {
            SessionEvent::Connected => self.connected.store(true, Ordering::SeqCst),
            SessionEvent::Disconnected => self.connected.store(false, Ordering::SeqCst),
            _ => {}
        }
        // No subscribers is fine: nobody is listening yet.
        let _ = self.events.send(event);
    }

    /// Confirm a join of `channel`.
    pub fn confirm_join(&self, channel: &str) {
        self.emit(SessionEvent::JoinConfirmed {
            channel: ChannelName::new(channel),
        });
    }

    /// Kick `target` from `channel`.
    pub fn kick(&self, channel: &str, target: &str) {
        self.emit(SessionEvent::Kicked {
            channel: ChannelName::new(channel),
            target: target.to_string(),
        });
    }

    /// Lose the connection without a disconnect command (netsplit, ping timeout).
    pub fn drop_connection(&self) {
        self.emit(SessionEvent::Disconnected);
    }

    /// Make every subsequent `send_join` fail with a transport error.
    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Change the nickname this session reports.
    pub fn set_nickname(&self, nickname: &str) {
        let mut guard = self.nickname.write().unwrap_or_else(PoisonError::into_inner);
        *guard = nickname.to_string();
    }

    fn record(&self, command: SessionCommand) -> Result<()> {
        self.commands.send(command).map_err(|_| SessionError::Closed)
    }
}

#[async_trait]
impl Session for MemorySession {
    async fn connect(&self) -> Result<()> {
        self.record(SessionCommand::Connect)?;
        self.emit(SessionEvent::Connected);
        Ok(())
    }

    async fn disconnect(&self, reason: &str) -> Result<()> {
        self.record(SessionCommand::Disconnect {
            reason: reason.to_string(),
        })?;
        self.emit(SessionEvent::Disconnected);
        Ok(())
    }

    async fn send_join(&self, channel: &ChannelName, key: Option<&str>) -> Result<()> {
        if !self.is_connected() {
            tracing::debug!(channel = %channel, "join refused, session not connected");
            return Err(SessionError::NotConnected);
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            tracing::debug!(channel = %channel, "injecting join send failure");
            return Err(SessionError::Transport("injected send failure".into()));
        }
        self.record(SessionCommand::Join {
            channel: channel.clone(),
            key: key.map(str::to_string),
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn nickname(&self) -> String {
        self.nickname
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
