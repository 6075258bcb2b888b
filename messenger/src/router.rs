//! Routes inbound envelopes to the listener or the correlation table
use intent_messenger_sdk::{Attachments, ChannelSet, Envelope, Kind, Listener, ReplyChannel,
                           Transport};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::correlation_table::CorrelationTable;

/// Message router
pub struct Router {
    /// Transport used to publish query responses
    transport: Arc<dyn Transport>,

    /// The single current listener, if any
    listener: RwLock<Option<Arc<dyn Listener>>>,

    /// Our own pending queries
    table: Arc<CorrelationTable>,
}

impl Router {
    pub fn new(transport: Arc<dyn Transport>, table: Arc<CorrelationTable>) -> Self {
        Self {
            transport,
            listener: RwLock::new(None),
            table,
        }
    }

    /// Set the listener, returning any it replaced
    pub async fn set_listener(&self, listener: Arc<dyn Listener>) -> Option<Arc<dyn Listener>> {
        self.listener.write().await.replace(listener)
    }

    /// Remove the listener, returning it
    pub async fn clear_listener(&self) -> Option<Arc<dyn Listener>> {
        self.listener.write().await.take()
    }

    pub async fn has_listener(&self) -> bool {
        self.listener.read().await.is_some()
    }

    /// Route attachments which arrived on the channel for `kind`
    pub async fn route(&self, kind: Kind, channel: &str, attachments: &Attachments) {
        let envelope = match Envelope::decode(kind, attachments) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!("Dropping malformed envelope on {channel}: {e}");
                return;
            }
        };

        match envelope {
            Envelope::Message { event, payload, .. } => {
                let Some(listener) = self.current_listener().await else {
                    debug!("No listener - message '{event}' dropped");
                    return;
                };

                debug!("Routing message '{event}'");
                listener.on_message(&event, payload.as_deref()).await;
            }

            Envelope::Query { event, payload, correlation_id, sender } => {
                let Some(listener) = self.current_listener().await else {
                    debug!("No listener - query '{event}' ({correlation_id}) dropped");
                    return;
                };

                debug!("Routing query '{event}' ({correlation_id}) from {sender:?}");
                let response_channel = sender
                    .map(|sender| ChannelSet::for_identity(&sender).response);
                let reply = ReplyChannel::new(self.transport.clone(), correlation_id,
                                              response_channel);
                listener.on_query(&event, payload.as_deref(), reply).await;
            }

            Envelope::Response { correlation_id, payload } => {
                debug!("Routing response for {correlation_id}");
                self.table.resolve(&correlation_id, payload.as_deref()).await;
            }
        }
    }

    // Copy the listener out so the lock isn't held while it runs
    async fn current_listener(&self) -> Option<Arc<dyn Listener>> {
        self.listener.read().await.clone()
    }
}
