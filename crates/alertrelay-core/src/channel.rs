//! Channel identities.
//!
//! Channel names on the chat network are case-insensitive, so two names
//! that differ only in ASCII case denote the same channel. [`ChannelName`]
//! keeps the spelling it was created with (that is what goes out in the
//! join command) but compares and hashes on the folded form.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Leading characters that mark a string as a channel name.
pub const CHANNEL_PREFIXES: [char; 4] = ['#', '&', '+', '!'];

/// Characters a channel name may never contain.
const FORBIDDEN: [char; 4] = [' ', ',', '\x07', ':'];

/// A channel identifier, compared case-insensitively.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelName(String);

impl ChannelName {
    /// Wrap a name without validating it.
    ///
    /// Names arriving from the network are taken as-is; configured names
    /// go through [`ChannelName::validate`].
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The name as originally spelled.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check that this is a well-formed channel name.
    pub fn validate(&self) -> Result<()> {
        let mut chars = self.0.chars();
        match chars.next() {
            None => Err(ConfigError::EmptyChannelName),
            Some(c) if !CHANNEL_PREFIXES.contains(&c) => {
                Err(ConfigError::InvalidChannelName(self.0.clone()))
            }
            Some(_) if self.0.len() == 1 || self.0.contains(FORBIDDEN) => {
                Err(ConfigError::InvalidChannelName(self.0.clone()))
            }
            Some(_) => Ok(()),
        }
    }
}

impl PartialEq for ChannelName {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Eq for ChannelName {}

impl Hash for ChannelName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for b in self.0.bytes() {
            state.write_u8(b.to_ascii_lowercase());
        }
        state.write_u8(0xff);
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChannelName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for ChannelName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// A channel the relay is configured to keep joined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSpec {
    /// The channel to join.
    pub name: ChannelName,
    /// Join key for keyed (`+k`) channels.
    #[serde(default, alias = "password", skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl ChannelSpec {
    /// A channel without a join key.
    pub fn new(name: impl Into<ChannelName>) -> Self {
        Self {
            name: name.into(),
            key: None,
        }
    }

    /// A channel protected by a join key.
    pub fn with_key(name: impl Into<ChannelName>, key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: Some(key.into()),
        }
    }

    /// The join key, if any.
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }
}
