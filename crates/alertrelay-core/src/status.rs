//! Membership status as observed by the reconciler.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::channel::ChannelName;

/// Where a desired channel stands relative to the live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChannelStatus {
    /// Not a member and no attempt outstanding (initial state and after a disconnect).
    #[default]
    NotJoined,
    /// A join was sent and no confirmation has arrived yet.
    JoinPending,
    /// The server confirmed membership.
    Joined,
}

impl ChannelStatus {
    /// Whether the channel can currently receive messages.
    pub fn is_joined(self) -> bool {
        self == ChannelStatus::Joined
    }
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChannelStatus::NotJoined => "not-joined",
            ChannelStatus::JoinPending => "join-pending",
            ChannelStatus::Joined => "joined",
        };
        f.write_str(s)
    }
}

/// Point-in-time copy of one channel's membership state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSnapshot {
    pub name: ChannelName,
    pub status: ChannelStatus,
    /// Join commands issued since the channel last left `NotJoined`.
    pub attempts: u32,
    /// When the most recent join command was issued.
    pub last_attempt_at: Option<Instant>,
    /// When membership was last confirmed.
    pub joined_at: Option<Instant>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display_matches_serde() {
        for status in [
            ChannelStatus::NotJoined,
            ChannelStatus::JoinPending,
            ChannelStatus::Joined,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{status}\""));
        }
        assert!(ChannelStatus::Joined.is_joined());
        assert!(!ChannelStatus::JoinPending.is_joined());
    }
}
