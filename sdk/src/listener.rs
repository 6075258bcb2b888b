//! Application-facing handlers: listeners for inbound traffic, reply
//! channels for answering queries, and response handlers for our own queries
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::envelope::{CorrelationId, Envelope};
use crate::transport::Transport;

/// What a response handler wants after seeing a response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseAction {
    /// Keep the query registered for further responses
    Continue,

    /// Forget the query - later responses are dropped
    Done,
}

/// Handler for responses to one of our queries
pub type ResponseHandler = dyn FnMut(Option<&str>) -> ResponseAction + Send + 'static;

/// Listener for inbound messages and queries on a bus
#[async_trait]
pub trait Listener: Send + Sync {

    /// Fire-and-forget event
    async fn on_message(&self, event: &str, payload: Option<&str>);

    /// Query - reply through `reply` as many times as wanted, now or later
    async fn on_query(&self, event: &str, payload: Option<&str>, reply: ReplyChannel);
}

/// Handle for answering a single query
///
/// Bound to the query's correlation ID and the sender's response channel.
/// Cheap to clone; every `respond` publishes one response.
#[derive(Clone)]
pub struct ReplyChannel {
    transport: Arc<dyn Transport>,
    correlation_id: CorrelationId,

    /// Sender's response channel - None if the query carried no sender
    response_channel: Option<String>,
}

impl ReplyChannel {
    pub fn new(transport: Arc<dyn Transport>, correlation_id: CorrelationId,
               response_channel: Option<String>) -> Self {
        Self { transport, correlation_id, response_channel }
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    /// Publish a response to the querying bus
    pub async fn respond(&self, payload: &str) {
        let Some(channel) = &self.response_channel else {
            warn!("Query {} has no sender - response dropped", self.correlation_id);
            return;
        };

        let response = Envelope::Response {
            correlation_id: self.correlation_id.clone(),
            payload: Some(payload.to_string()),
        };

        debug!("Responding to {} on {channel}", self.correlation_id);
        self.transport.publish(channel, response.encode()).await
            .unwrap_or_else(|e| error!("Failed to publish response on {channel}: {e}"));
    }
}
