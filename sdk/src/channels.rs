//! Bus identities and the channel names derived from them
use anyhow::{bail, Result};
use std::fmt;

use crate::envelope::Kind;

const MESSAGE_SUFFIX: &str = ".messenger.action.message";
const QUERY_SUFFIX: &str = ".messenger.action.query";
const RESPONSE_SUFFIX: &str = ".messenger.action.response";

/// Identity of the process that owns a bus - also its reply-to address
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BusIdentity(String);

impl BusIdentity {
    /// Create an identity - fails if empty, since no channels can be derived
    pub fn new(identity: impl Into<String>) -> Result<Self> {
        let identity = identity.into();
        if identity.trim().is_empty() {
            bail!("Bus identity must not be empty");
        }
        Ok(Self(identity))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Channels this identity listens on
    pub fn channels(&self) -> ChannelSet {
        ChannelSet::for_identity(&self.0)
    }
}

impl fmt::Display for BusIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The three channel names for one identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSet {
    pub message: String,
    pub query: String,
    pub response: String,
}

impl ChannelSet {
    /// Derive channel names for any identity, including remote ones we only
    /// know as a string from an envelope
    pub fn for_identity(identity: &str) -> Self {
        Self {
            message: format!("{identity}{MESSAGE_SUFFIX}"),
            query: format!("{identity}{QUERY_SUFFIX}"),
            response: format!("{identity}{RESPONSE_SUFFIX}"),
        }
    }

    /// Channel carrying the given kind
    pub fn channel(&self, kind: Kind) -> &str {
        match kind {
            Kind::Message => &self.message,
            Kind::Query => &self.query,
            Kind::Response => &self.response,
        }
    }

    /// All three, in subscription order
    pub fn iter(&self) -> impl Iterator<Item = (Kind, &str)> {
        Kind::ALL.into_iter().map(move |kind| (kind, self.channel(kind)))
    }
}

// -- Tests --
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_identity_is_rejected() {
        assert!(BusIdentity::new("").is_err());
        assert!(BusIdentity::new("   ").is_err());
    }

    #[test]
    fn channels_are_identity_plus_suffix() {
        let identity = BusIdentity::new("org.example.app").unwrap();
        let channels = identity.channels();
        assert_eq!(channels.message, "org.example.app.messenger.action.message");
        assert_eq!(channels.query, "org.example.app.messenger.action.query");
        assert_eq!(channels.response, "org.example.app.messenger.action.response");
    }

    #[test]
    fn iter_yields_all_three_kinds_once() {
        let channels = ChannelSet::for_identity("a");
        let kinds: Vec<Kind> = channels.iter().map(|(kind, _)| kind).collect();
        assert_eq!(kinds, vec![Kind::Message, Kind::Query, Kind::Response]);
        assert_eq!(channels.channel(Kind::Query), "a.messenger.action.query");
    }
}
