//! Proptest generators for property-based testing.

use proptest::prelude::*;

use alertrelay_core::ChannelSpec;

/// Generate a lowercase `#` channel name.
pub fn channel_name() -> impl Strategy<Value = String> {
    "#[a-z][a-z0-9_-]{0,15}".prop_map(String::from)
}

/// Generate between 1 and `max` distinct channels.
pub fn channel_specs(max: usize) -> impl Strategy<Value = Vec<ChannelSpec>> {
    prop::collection::btree_set(channel_name(), 1..=max.max(1))
        .prop_map(|names| names.into_iter().map(ChannelSpec::new).collect())
}

/// One input to a [`ChannelTable`](alertrelay_reconciler::ChannelTable).
///
/// Channel positions index into the generated channel set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableInput {
    Connected,
    Disconnected,
    Confirm { channel: usize },
    /// Confirmation for a channel outside the desired set.
    ConfirmUnknown,
    KickSelf { channel: usize },
    KickOther { channel: usize },
    /// The channel's live retry timer fires, if it has one.
    RetryFired { channel: usize },
    /// A timer the channel already cancelled or consumed fires late.
    StaleRetry { channel: usize },
}

/// Generate a single input for a table of `channels` channels.
pub fn table_input(channels: usize) -> impl Strategy<Value = TableInput> {
    let channel = 0..channels.max(1);
    prop_oneof![
        2 => Just(TableInput::Connected),
        1 => Just(TableInput::Disconnected),
        4 => channel.clone().prop_map(|channel| TableInput::Confirm { channel }),
        1 => Just(TableInput::ConfirmUnknown),
        2 => channel.clone().prop_map(|channel| TableInput::KickSelf { channel }),
        1 => channel.clone().prop_map(|channel| TableInput::KickOther { channel }),
        4 => channel.clone().prop_map(|channel| TableInput::RetryFired { channel }),
        1 => channel.prop_map(|channel| TableInput::StaleRetry { channel }),
    ]
}

/// Generate up to `max_len` inputs for a table of `channels` channels.
pub fn table_script(channels: usize, max_len: usize) -> impl Strategy<Value = Vec<TableInput>> {
    prop::collection::vec(table_input(channels), 0..=max_len)
}
