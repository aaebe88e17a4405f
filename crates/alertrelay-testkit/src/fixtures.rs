//! Test fixtures and helpers.
//!
//! Common setup code for reconciler scenario tests.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use tokio::sync::{mpsc, watch};

use alertrelay_core::{ChannelName, ChannelSpec, ChannelStatus, ReconcilerConfig};
use alertrelay_reconciler::{ChannelReconciler, ManualClock, ManualDelayer, MembershipView};
use alertrelay_session::{MemorySession, Session, SessionCommand};

use crate::logging::init_tracing;

/// Nickname of the fixture's session.
pub const FIXTURE_NICK: &str = "alertbot";

/// Retry delay used by [`ReconcilerFixture::new`].
pub const TEST_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Upper bound on any single wait. Timers are manual, so this only trips
/// when a test is broken, never because the code under test is slow.
const STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// A reconciler wired to an in-memory session and manual timing.
pub struct ReconcilerFixture {
    pub session: Arc<MemorySession>,
    pub delayer: ManualDelayer,
    pub clock: Arc<ManualClock>,
    pub reconciler: ChannelReconciler,
    pub membership: MembershipView,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    shutdown: watch::Sender<bool>,
    joins_seen: usize,
}

impl ReconcilerFixture {
    /// Create a fixture for keyless channels and [`TEST_RETRY_DELAY`].
    pub fn new(channels: &[&str]) -> anyhow::Result<Self> {
        let specs = channels.iter().map(|c| ChannelSpec::new(*c)).collect();
        Self::with_config(ReconcilerConfig::new(specs).with_retry_delay(TEST_RETRY_DELAY))
    }

    /// Create a fixture for an arbitrary configuration.
    pub fn with_config(config: ReconcilerConfig) -> anyhow::Result<Self> {
        init_tracing();

        let (session, commands) = MemorySession::new(FIXTURE_NICK);
        let delayer = ManualDelayer::new();
        let clock = Arc::new(ManualClock::new());
        let reconciler = ChannelReconciler::new(
            config,
            session.clone(),
            Arc::new(delayer.clone()),
            clock.clone(),
        )?;
        let membership = reconciler.membership();
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            session,
            delayer,
            clock,
            reconciler,
            membership,
            commands,
            shutdown,
            joins_seen: 0,
        })
    }

    /// Start the reconciler under the fixture's shutdown signal.
    pub async fn start(&self) -> anyhow::Result<()> {
        self.reconciler.start(self.shutdown.subscribe()).await?;
        Ok(())
    }

    /// Stop the reconciler.
    pub async fn stop(&self) -> anyhow::Result<()> {
        self.reconciler.stop().await?;
        Ok(())
    }

    /// Flip the shutdown signal handed to the reconciler at start.
    pub fn trigger_shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Connect the session.
    pub async fn connect(&self) -> anyhow::Result<()> {
        self.session.connect().await?;
        Ok(())
    }

    /// Disconnect the session.
    pub async fn disconnect(&self) -> anyhow::Result<()> {
        self.session.disconnect("see ya").await?;
        Ok(())
    }

    /// The next join command the session received, skipping other commands.
    pub async fn next_join(&mut self) -> anyhow::Result<ChannelName> {
        Ok(self.next_keyed_join().await?.0)
    }

    /// Like [`next_join`](Self::next_join), but also returns the key sent.
    pub async fn next_keyed_join(&mut self) -> anyhow::Result<(ChannelName, Option<String>)> {
        loop {
            let command = within(self.commands.recv())
                .await
                .context("waiting for a join command")?
                .ok_or_else(|| anyhow!("session command log closed"))?;
            if let SessionCommand::Join { channel, key } = command {
                self.joins_seen += 1;
                return Ok((channel, key));
            }
        }
    }

    /// The next `count` join commands.
    pub async fn next_joins(&mut self, count: usize) -> anyhow::Result<Vec<ChannelName>> {
        let mut joins = Vec::with_capacity(count);
        for _ in 0..count {
            joins.push(self.next_join().await?);
        }
        Ok(joins)
    }

    /// Fail if a join command is already waiting in the log.
    ///
    /// The reconciler sends joins before it publishes membership, so this is
    /// reliable right after a `wait_*` call returns.
    pub fn assert_no_join(&mut self) -> anyhow::Result<()> {
        while let Ok(command) = self.commands.try_recv() {
            if let SessionCommand::Join { channel, .. } = command {
                bail!("unexpected join for {channel}");
            }
        }
        Ok(())
    }

    /// Join commands returned by [`next_join`](Self::next_join) so far.
    pub fn joins_seen(&self) -> usize {
        self.joins_seen
    }

    /// Fire the oldest pending retry timer.
    pub fn fire_retry(&self) -> anyhow::Result<()> {
        if !self.delayer.fire_next() {
            bail!("no retry timer pending");
        }
        Ok(())
    }

    /// Wait until `channel` reaches `status`.
    pub async fn wait_status(&mut self, channel: &str, status: ChannelStatus) -> anyhow::Result<()> {
        within(
            self.membership
                .wait_for_status(&ChannelName::new(channel), status),
        )
        .await
        .with_context(|| format!("waiting for {channel} to be {status}"))??;
        Ok(())
    }

    /// Wait until `channel` is joined.
    pub async fn wait_joined(&mut self, channel: &str) -> anyhow::Result<()> {
        self.wait_status(channel, ChannelStatus::Joined).await
    }

    /// Confirm every join in `channels` and wait until each is joined.
    pub async fn confirm_all(&mut self, channels: &[ChannelName]) -> anyhow::Result<()> {
        for channel in channels {
            self.session.confirm_join(channel.as_str());
        }
        for channel in channels {
            self.wait_joined(channel.as_str()).await?;
        }
        Ok(())
    }
}

async fn within<F: Future>(future: F) -> anyhow::Result<F::Output> {
    tokio::time::timeout(STEP_TIMEOUT, future)
        .await
        .map_err(|_| anyhow!("timed out after {STEP_TIMEOUT:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fixture_starts_idle() {
        let fixture = ReconcilerFixture::new(&["#foo", "#bar"]).unwrap();

        assert!(!fixture.session.is_connected());
        assert_eq!(fixture.delayer.pending(), 0);
        let snapshot = fixture.membership.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot
            .iter()
            .all(|c| c.status == ChannelStatus::NotJoined));
    }

    #[tokio::test]
    async fn test_fixture_rejects_bad_config() {
        assert!(ReconcilerFixture::new(&[]).is_err());
        assert!(ReconcilerFixture::new(&["nohash"]).is_err());
    }

    #[tokio::test]
    async fn test_next_join_skips_lifecycle_commands() {
        let mut fixture = ReconcilerFixture::new(&["#foo"]).unwrap();
        fixture.start().await.unwrap();
        fixture.connect().await.unwrap();

        assert_eq!(fixture.next_join().await.unwrap(), ChannelName::new("#foo"));
        assert_eq!(fixture.joins_seen(), 1);

        fixture.stop().await.unwrap();
    }
}
