//! Publisher channel identifiers.
//!
//! A channel is either a bare site domain (`brave.com`) or a provider
//! reference of the form `provider#suffix:value`, such as
//! `youtube#channel:UC1234` or `twitter#channel:9876`. Ledger account ids
//! derived from channels must be stable, so every write path normalizes
//! the channel through [`Channel::normalize`] before deriving ids.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A publisher channel identifier.
///
/// Wraps the raw string form and gives structured access to provider
/// references via [`Channel::props`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Channel(String);

/// Structured parts of a provider-form channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelProps {
    /// The provider, e.g. `youtube`.
    pub provider_name: String,
    /// The provider suffix, e.g. `channel` or `user`.
    pub provider_suffix: String,
    /// The provider-scoped value, e.g. a channel id.
    pub provider_value: String,
}

impl Channel {
    /// Creates a channel from a raw string.
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Returns the raw string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true for the empty channel.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parses the provider parts of a `provider#suffix:value` channel.
    ///
    /// Returns `None` for bare site channels.
    #[must_use]
    pub fn props(&self) -> Option<ChannelProps> {
        let (provider, rest) = self.0.split_once('#')?;
        let (suffix, value) = rest.split_once(':')?;
        if provider.is_empty() || suffix.is_empty() || value.is_empty() {
            return None;
        }
        Some(ChannelProps {
            provider_name: provider.to_string(),
            provider_suffix: suffix.to_string(),
            provider_value: value.to_string(),
        })
    }

    /// Returns the canonical form used for id derivation and account keys.
    ///
    /// Provider-form channels are rebuilt from their parsed parts with
    /// surrounding whitespace removed; bare channels are trimmed only.
    #[must_use]
    pub fn normalize(&self) -> Self {
        let trimmed = Self(self.0.trim().to_string());
        match trimmed.props() {
            Some(props) => Self(format!(
                "{}#{}:{}",
                props.provider_name.trim(),
                props.provider_suffix.trim(),
                props.provider_value.trim()
            )),
            None => trimmed,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Channel {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

impl From<String> for Channel {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}
