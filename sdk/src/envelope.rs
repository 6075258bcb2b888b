//! Logical envelopes and their mapping onto transport attachments
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::transport::Attachments;

/// Wire-level attachment keys - every participant must agree on these
pub const KEY_EVENT: &str = "event";
pub const KEY_DATA: &str = "data";
pub const KEY_ID: &str = "id";
pub const KEY_SENDER: &str = "package";

/// Envelope kind, one per channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Message,
    Query,
    Response,
}

impl Kind {
    pub const ALL: [Kind; 3] = [Kind::Message, Kind::Query, Kind::Response];
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Kind::Message => "message",
            Kind::Query => "query",
            Kind::Response => "response",
        })
    }
}

/// Token matching a query to its responses
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Fresh random ID
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CorrelationId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Logical message unit exchanged over a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    /// Fire-and-forget event.  Sender is informational only
    Message {
        event: String,
        payload: Option<String>,
        sender: Option<String>,
    },

    /// Request expecting zero or more responses on the sender's response channel
    Query {
        event: String,
        payload: Option<String>,
        correlation_id: CorrelationId,
        sender: Option<String>,
    },

    /// Reply to a query
    Response {
        correlation_id: CorrelationId,
        payload: Option<String>,
    },
}

impl Envelope {
    pub fn kind(&self) -> Kind {
        match self {
            Envelope::Message { .. } => Kind::Message,
            Envelope::Query { .. } => Kind::Query,
            Envelope::Response { .. } => Kind::Response,
        }
    }

    /// Flatten into attachments.  `data` is always written, empty if no payload
    pub fn encode(&self) -> Attachments {
        let mut attachments = Attachments::new();

        let (event, payload, correlation_id, sender) = match self {
            Envelope::Message { event, payload, sender } =>
                (Some(event), payload, None, sender.as_ref()),
            Envelope::Query { event, payload, correlation_id, sender } =>
                (Some(event), payload, Some(correlation_id), sender.as_ref()),
            Envelope::Response { correlation_id, payload } =>
                (None, payload, Some(correlation_id), None),
        };

        if let Some(event) = event {
            attachments.insert(KEY_EVENT.to_string(), event.clone());
        }
        attachments.insert(KEY_DATA.to_string(), payload.clone().unwrap_or_default());
        if let Some(id) = correlation_id {
            attachments.insert(KEY_ID.to_string(), id.as_str().to_string());
        }
        if let Some(sender) = sender {
            attachments.insert(KEY_SENDER.to_string(), sender.clone());
        }

        attachments
    }

    /// Rebuild an envelope of the kind implied by the channel it arrived on.
    /// Fails if a field required for that kind is missing
    pub fn decode(kind: Kind, attachments: &Attachments) -> Result<Envelope> {
        let payload = attachments.get(KEY_DATA).cloned();
        let sender = attachments.get(KEY_SENDER).cloned();

        let event = || attachments.get(KEY_EVENT).cloned()
            .ok_or_else(|| anyhow!("No '{KEY_EVENT}' in {kind}"));
        let correlation_id = || attachments.get(KEY_ID)
            .map(|id| CorrelationId::from(id.as_str()))
            .ok_or_else(|| anyhow!("No '{KEY_ID}' in {kind}"));

        Ok(match kind {
            Kind::Message => Envelope::Message { event: event()?, payload, sender },
            Kind::Query => Envelope::Query {
                event: event()?,
                payload,
                correlation_id: correlation_id()?,
                sender,
            },
            Kind::Response => Envelope::Response {
                correlation_id: correlation_id()?,
                payload,
            },
        })
    }
}

// -- Tests --
#[cfg(test)]
mod tests {
    use super::*;

    fn attachments(pairs: &[(&str, &str)]) -> Attachments {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn generated_ids_are_distinct() {
        assert_ne!(CorrelationId::generate(), CorrelationId::generate());
    }

    #[test]
    fn query_encodes_all_four_keys() {
        let query = Envelope::Query {
            event: "ping".to_string(),
            payload: Some("1".to_string()),
            correlation_id: CorrelationId::from("abc"),
            sender: Some("org.example.a".to_string()),
        };

        let encoded = query.encode();
        assert_eq!(encoded, attachments(&[
            ("event", "ping"), ("data", "1"), ("id", "abc"), ("package", "org.example.a"),
        ]));
        assert_eq!(Envelope::decode(Kind::Query, &encoded).unwrap(), query);
    }

    #[test]
    fn response_carries_no_event_or_sender() {
        let response = Envelope::Response {
            correlation_id: CorrelationId::from("abc"),
            payload: Some("pong".to_string()),
        };

        let encoded = response.encode();
        assert!(!encoded.contains_key(KEY_EVENT));
        assert!(!encoded.contains_key(KEY_SENDER));
        assert_eq!(encoded.get(KEY_ID).map(String::as_str), Some("abc"));
    }

    #[test]
    fn missing_payload_is_written_as_empty_data() {
        let message = Envelope::Message {
            event: "tick".to_string(),
            payload: None,
            sender: None,
        };
        assert_eq!(message.encode().get(KEY_DATA).map(String::as_str), Some(""));
    }

    #[test]
    fn missing_data_decodes_as_none() {
        let decoded = Envelope::decode(Kind::Message, &attachments(&[("event", "tick")]))
            .unwrap();
        assert_eq!(decoded, Envelope::Message {
            event: "tick".to_string(),
            payload: None,
            sender: None,
        });
    }

    #[test]
    fn message_without_event_is_invalid() {
        assert!(Envelope::decode(Kind::Message, &attachments(&[("data", "x")])).is_err());
    }

    #[test]
    fn query_without_id_is_invalid() {
        let attachments = attachments(&[("event", "ping"), ("data", "1")]);
        assert!(Envelope::decode(Kind::Query, &attachments).is_err());
    }

    #[test]
    fn response_without_id_is_invalid() {
        assert!(Envelope::decode(Kind::Response, &attachments(&[("data", "pong")])).is_err());
    }

    #[test]
    fn query_without_sender_still_decodes() {
        let decoded = Envelope::decode(Kind::Query,
                                       &attachments(&[("event", "ping"), ("id", "x")]))
            .unwrap();
        assert_eq!(decoded.kind(), Kind::Query);
    }
}
