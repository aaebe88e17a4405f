//! Channel membership table.
//!
//! [`ChannelTable`] is the reconciler's state machine with the I/O taken
//! out. Each input (a session event or a retry firing) updates the table
//! and returns the [`Action`]s the caller must carry out, in order. The
//! table never talks to the session or to timers itself, which keeps every
//! transition testable without a runtime.
//!
//! Invariants maintained by every method:
//! - a channel is `Joined` only while the session is connected;
//! - a channel has a pending retry exactly when it is `JoinPending`;
//! - an `ArmRetry` is never issued for a channel whose previous retry is
//!   still live, and each `Join` follows the `ArmRetry` covering it.

use std::collections::HashMap;
use std::time::Instant;

use alertrelay_core::{ChannelName, ChannelSnapshot, ChannelSpec, ChannelStatus};

/// Identifies one armed retry timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RetryToken(u64);

/// Side effect requested by the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Arm a retry timer for the channel at `channel`, tagged with `token`.
    ArmRetry { channel: usize, token: RetryToken },
    /// Cancel the retry timer tagged with `token`.
    CancelRetry { channel: usize, token: RetryToken },
    /// Send a join command for the channel at `channel`.
    Join { channel: usize },
}

#[derive(Debug)]
struct ChannelState {
    spec: ChannelSpec,
    status: ChannelStatus,
    pending_retry: Option<RetryToken>,
    attempts: u32,
    last_attempt_at: Option<Instant>,
    joined_at: Option<Instant>,
}

/// Desired channels and what is known about each of them.
#[derive(Debug)]
pub struct ChannelTable {
    channels: Vec<ChannelState>,
    index: HashMap<ChannelName, usize>,
    connected: bool,
    next_token: u64,
}

impl ChannelTable {
    /// Create a table with every channel `NotJoined`.
    ///
    /// Later duplicates of a name are dropped; configurations are expected
    /// to be validated already.
    pub fn new(specs: &[ChannelSpec]) -> Self {
        let mut channels = Vec::with_capacity(specs.len());
        let mut index = HashMap::with_capacity(specs.len());
        for spec in specs {
            if index.contains_key(&spec.name) {
                continue;
            }
            index.insert(spec.name.clone(), channels.len());
            channels.push(ChannelState {
                spec: spec.clone(),
                status: ChannelStatus::NotJoined,
                pending_retry: None,
                attempts: 0,
                last_attempt_at: None,
                joined_at: None,
            });
        }
        Self {
            channels,
            index,
            connected: false,
            next_token: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Whether the last lifecycle signal said connected.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Configuration of the channel at `channel`.
    pub fn spec(&self, channel: usize) -> Option<&ChannelSpec> {
        self.channels.get(channel).map(|c| &c.spec)
    }

    /// Position of `name` in the table.
    pub fn position(&self, name: &ChannelName) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Status of the channel at `channel`.
    pub fn status_at(&self, channel: usize) -> Option<ChannelStatus> {
        self.channels.get(channel).map(|c| c.status)
    }

    /// Status of `name`, if it is a desired channel.
    pub fn status(&self, name: &ChannelName) -> Option<ChannelStatus> {
        self.position(name).and_then(|i| self.status_at(i))
    }

    /// The live retry token of the channel at `channel`.
    pub fn pending_retry(&self, channel: usize) -> Option<RetryToken> {
        self.channels.get(channel).and_then(|c| c.pending_retry)
    }

    /// Copy out the state of every channel, in configuration order.
    pub fn snapshot(&self) -> Vec<ChannelSnapshot> {
        self.channels
            .iter()
            .map(|c| ChannelSnapshot {
                name: c.spec.name.clone(),
                status: c.status,
                attempts: c.attempts,
                last_attempt_at: c.last_attempt_at,
                joined_at: c.joined_at,
            })
            .collect()
    }

    /// The session is connected: start joining every channel not yet in flight.
    pub fn on_connected(&mut self, now: Instant) -> Vec<Action> {
        self.connected = true;
        let mut actions = Vec::new();
        for channel in 0..self.channels.len() {
            if self.channels[channel].status == ChannelStatus::NotJoined {
                self.begin_attempt(channel, now, &mut actions);
            }
        }
        actions
    }

    /// The session is gone: forget all membership and drop every retry.
    pub fn on_disconnected(&mut self) -> Vec<Action> {
        self.connected = false;
        let mut actions = Vec::new();
        for (channel, state) in self.channels.iter_mut().enumerate() {
            if let Some(token) = state.pending_retry.take() {
                actions.push(Action::CancelRetry { channel, token });
            }
            state.status = ChannelStatus::NotJoined;
            state.attempts = 0;
            state.joined_at = None;
        }
        actions
    }

    /// The server confirmed membership of `name`.
    pub fn on_join_confirmed(&mut self, name: &ChannelName, now: Instant) -> Vec<Action> {
        let Some(channel) = self.position(name) else {
            tracing::debug!(channel = %name, "ignoring join confirmation for undesired channel");
            return Vec::new();
        };
        if !self.connected {
            tracing::debug!(channel = %name, "ignoring join confirmation while disconnected");
            return Vec::new();
        }

        let mut actions = Vec::new();
        let state = &mut self.channels[channel];
        if let Some(token) = state.pending_retry.take() {
            actions.push(Action::CancelRetry { channel, token });
        }
        if state.status != ChannelStatus::Joined {
            tracing::info!(channel = %name, attempts = state.attempts, "channel joined");
            state.joined_at = Some(now);
        }
        state.status = ChannelStatus::Joined;
        actions
    }

    /// The retry timer tagged `token` for the channel at `channel` fired.
    ///
    /// Firings of timers that were cancelled or superseded are ignored.
    pub fn on_retry_due(&mut self, channel: usize, token: RetryToken, now: Instant) -> Vec<Action> {
        let Some(state) = self.channels.get_mut(channel) else {
            return Vec::new();
        };
        if state.pending_retry != Some(token) {
            tracing::debug!(channel = %state.spec.name, token = token.0, "ignoring stale retry");
            return Vec::new();
        }
        state.pending_retry = None;

        let mut actions = Vec::new();
        if self.connected && state.status == ChannelStatus::JoinPending {
            tracing::debug!(
                channel = %state.spec.name,
                attempts = state.attempts,
                "no join confirmation yet, retrying"
            );
            self.begin_attempt(channel, now, &mut actions);
        }
        actions
    }

    /// `target` was kicked from `name`; rejoin at once if that was us.
    pub fn on_kicked(
        &mut self,
        name: &ChannelName,
        target: &str,
        own_nickname: &str,
        now: Instant,
    ) -> Vec<Action> {
        if !target.eq_ignore_ascii_case(own_nickname) {
            return Vec::new();
        }
        let Some(channel) = self.position(name) else {
            tracing::debug!(channel = %name, "ignoring kick from undesired channel");
            return Vec::new();
        };

        let mut actions = Vec::new();
        if self.connected && self.channels[channel].status == ChannelStatus::Joined {
            tracing::warn!(channel = %name, "kicked from channel, rejoining");
            self.channels[channel].joined_at = None;
            self.begin_attempt(channel, now, &mut actions);
        }
        actions
    }

    fn begin_attempt(&mut self, channel: usize, now: Instant, actions: &mut Vec<Action>) {
        let token = RetryToken(self.next_token);
        self.next_token += 1;

        let state = &mut self.channels[channel];
        if let Some(previous) = state.pending_retry.replace(token) {
            actions.push(Action::CancelRetry {
                channel,
                token: previous,
            });
        }
        state.status = ChannelStatus::JoinPending;
        state.attempts = state.attempts.saturating_add(1);
        state.last_attempt_at = Some(now);

        actions.push(Action::ArmRetry { channel, token });
        actions.push(Action::Join { channel });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn table(names: &[&str]) -> ChannelTable {
        let specs: Vec<_> = names.iter().map(|n| ChannelSpec::new(*n)).collect();
        ChannelTable::new(&specs)
    }

    fn joins(actions: &[Action]) -> Vec<usize> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::Join { channel } => Some(*channel),
                _ => None,
            })
            .collect()
    }

    fn armed(actions: &[Action]) -> Vec<(usize, RetryToken)> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::ArmRetry { channel, token } => Some((*channel, *token)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_new_table_is_not_joined() {
        let t = table(&["#foo", "#bar"]);
        assert_eq!(t.len(), 2);
        assert!(!t.is_connected());
        assert_eq!(t.status(&"#foo".into()), Some(ChannelStatus::NotJoined));
        assert_eq!(t.status(&"#nope".into()), None);
    }

    #[test]
    fn test_duplicate_specs_collapse() {
        let t = table(&["#foo", "#FOO"]);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn test_connect_joins_all_and_arms_before_join() {
        let mut t = table(&["#foo", "#bar", "#baz"]);
        let now = Instant::now();
        let actions = t.on_connected(now);

        assert_eq!(joins(&actions), vec![0, 1, 2]);
        assert_eq!(armed(&actions).len(), 3);
        for channel in 0..3 {
            let arm = actions
                .iter()
                .position(|a| matches!(a, Action::ArmRetry { channel: c, .. } if *c == channel));
            let join = actions
                .iter()
                .position(|a| matches!(a, Action::Join { channel: c } if *c == channel));
            assert!(arm < join);
            assert_eq!(t.status_at(channel), Some(ChannelStatus::JoinPending));
        }
    }

    #[test]
    fn test_repeated_connect_does_not_double_join() {
        let mut t = table(&["#foo"]);
        let now = Instant::now();
        t.on_connected(now);
        assert!(t.on_connected(now).is_empty());
    }

    #[test]
    fn test_confirmation_cancels_retry() {
        let mut t = table(&["#foo"]);
        let now = Instant::now();
        let (_, token) = armed(&t.on_connected(now))[0];

        let actions = t.on_join_confirmed(&"#Foo".into(), now);

        assert_eq!(actions, vec![Action::CancelRetry { channel: 0, token }]);
        assert_eq!(t.status_at(0), Some(ChannelStatus::Joined));
        assert_eq!(t.pending_retry(0), None);
        assert_eq!(t.snapshot()[0].joined_at, Some(now));
    }

    #[test]
    fn test_confirmation_for_undesired_channel_ignored() {
        let mut t = table(&["#foo"]);
        t.on_connected(Instant::now());
        assert!(t.on_join_confirmed(&"#other".into(), Instant::now()).is_empty());
        assert_eq!(t.status_at(0), Some(ChannelStatus::JoinPending));
    }

    #[test]
    fn test_confirmation_while_disconnected_ignored() {
        let mut t = table(&["#foo"]);
        assert!(t.on_join_confirmed(&"#foo".into(), Instant::now()).is_empty());
        assert_eq!(t.status_at(0), Some(ChannelStatus::NotJoined));
    }

    #[test]
    fn test_retry_rearms_and_rejoins() {
        let mut t = table(&["#foo"]);
        let now = Instant::now();
        let (_, first) = armed(&t.on_connected(now))[0];

        let actions = t.on_retry_due(0, first, now);

        assert_eq!(joins(&actions), vec![0]);
        let (_, second) = armed(&actions)[0];
        assert_ne!(first, second);
        assert_eq!(t.pending_retry(0), Some(second));
        assert_eq!(t.snapshot()[0].attempts, 2);
    }

    #[test]
    fn test_stale_retry_ignored() {
        let mut t = table(&["#foo"]);
        let now = Instant::now();
        let (_, token) = armed(&t.on_connected(now))[0];
        t.on_join_confirmed(&"#foo".into(), now);

        assert!(t.on_retry_due(0, token, now).is_empty());
        assert_eq!(t.status_at(0), Some(ChannelStatus::Joined));
    }

    #[test]
    fn test_disconnect_resets_and_cancels() {
        let mut t = table(&["#foo", "#bar"]);
        let now = Instant::now();
        let tokens = armed(&t.on_connected(now));
        t.on_join_confirmed(&"#foo".into(), now);

        let actions = t.on_disconnected();

        assert_eq!(
            actions,
            vec![Action::CancelRetry {
                channel: 1,
                token: tokens[1].1
            }]
        );
        assert!(!t.is_connected());
        for snapshot in t.snapshot() {
            assert_eq!(snapshot.status, ChannelStatus::NotJoined);
            assert_eq!(snapshot.attempts, 0);
        }
    }

    #[test]
    fn test_kick_of_self_rejoins_immediately() {
        let mut t = table(&["#foo"]);
        let now = Instant::now();
        t.on_connected(now);
        t.on_join_confirmed(&"#foo".into(), now);

        let actions = t.on_kicked(&"#foo".into(), "Relay", "relay", now);

        assert_eq!(joins(&actions), vec![0]);
        assert_eq!(t.status_at(0), Some(ChannelStatus::JoinPending));
    }

    #[test]
    fn test_kick_of_someone_else_ignored() {
        let mut t = table(&["#foo"]);
        let now = Instant::now();
        t.on_connected(now);
        t.on_join_confirmed(&"#foo".into(), now);

        assert!(t.on_kicked(&"#foo".into(), "alice", "relay", now).is_empty());
        assert_eq!(t.status_at(0), Some(ChannelStatus::Joined));
    }

    #[test]
    fn test_kick_while_pending_leaves_retry_in_charge() {
        let mut t = table(&["#foo"]);
        let now = Instant::now();
        let (_, token) = armed(&t.on_connected(now))[0];

        assert!(t.on_kicked(&"#foo".into(), "relay", "relay", now).is_empty());
        assert_eq!(t.pending_retry(0), Some(token));
    }

    proptest! {
        #[test]
        fn prop_tokens_are_never_reused(retries in prop::collection::vec(0usize..3, 0..32)) {
            let mut t = table(&["#a", "#b", "#c"]);
            let now = Instant::now();
            let mut seen: Vec<RetryToken> = armed(&t.on_connected(now))
                .into_iter()
                .map(|(_, token)| token)
                .collect();

            for channel in retries {
                let Some(token) = t.pending_retry(channel) else { continue };
                for (_, fresh) in armed(&t.on_retry_due(channel, token, now)) {
                    prop_assert!(seen.iter().all(|old| *old < fresh));
                    seen.push(fresh);
                }
            }
        }
    }
}
