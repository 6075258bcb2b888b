//! Intent messenger - fire-and-forget messages and correlated queries
//! between processes over a lossy broadcast transport

use ::config::Config;
use anyhow::Result;
use intent_messenger_sdk::{BusIdentity, ChannelSet, CorrelationId, Envelope, Listener,
                           ResponseAction, Transport};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

pub mod config;
pub mod correlation_table;
pub mod in_memory_transport;
pub mod rabbit_mq_transport;
pub mod registrar;
pub mod router;

pub use self::config::{create_transport, get_sub_config, MessengerConfig, TransportConfig};
pub use self::in_memory_transport::InMemoryTransport;
pub use self::rabbit_mq_transport::RabbitMqTransport;

use correlation_table::CorrelationTable;
use registrar::Registrar;
use router::Router;

/// One bus endpoint
///
/// The correlation table and the listener slot each have their own lock,
/// and neither is held while a handler or listener runs.  Deliveries hold
/// the registrar's read guard throughout, so a listener must spawn, not
/// await, a `stop` of its own messenger.
pub struct Messenger {
    /// Who we are - reply-to address on our queries
    identity: BusIdentity,

    /// Shared broadcast medium
    transport: Arc<dyn Transport>,

    /// Our pending queries
    table: Arc<CorrelationTable>,

    /// Inbound dispatch, holding the listener
    router: Arc<Router>,

    /// Our three channel subscriptions
    registrar: Registrar,

    /// Forget unanswered queries after this long - None is never
    pending_expiry: Option<Duration>,
}

impl Messenger {

    /// Create a stopped messenger.  Fails if the identity is empty
    pub fn new(identity: impl Into<String>, transport: Arc<dyn Transport>) -> Result<Self> {
        let identity = BusIdentity::new(identity)?;
        info!("Creating messenger '{identity}'");

        let table = Arc::new(CorrelationTable::new());
        let router = Arc::new(Router::new(transport.clone(), table.clone()));
        let registrar = Registrar::new(&identity.channels(), transport.clone(), router.clone());

        Ok(Self {
            identity,
            transport,
            table,
            router,
            registrar,
            pending_expiry: None,
        })
    }

    /// Create from the `[messenger]` section of a config
    pub fn from_config(config: &Config, transport: Arc<dyn Transport>) -> Result<Self> {
        let messenger_config = MessengerConfig::from_config(config)?;
        let pending_expiry = messenger_config.pending_expiry()?;

        let mut messenger = Self::new(messenger_config.identity, transport)?;
        messenger.pending_expiry = pending_expiry;
        Ok(messenger)
    }

    /// Forget queries still unanswered after `expiry`
    pub fn with_pending_expiry(mut self, expiry: Duration) -> Self {
        self.pending_expiry = Some(expiry);
        self
    }

    pub fn identity(&self) -> &BusIdentity {
        &self.identity
    }

    /// Set the listener for inbound messages and queries, replacing any
    /// previous one, which is returned
    pub async fn set_listener(&self, listener: Arc<dyn Listener>) -> Option<Arc<dyn Listener>> {
        self.router.set_listener(listener).await
    }

    pub async fn clear_listener(&self) -> Option<Arc<dyn Listener>> {
        self.router.clear_listener().await
    }

    /// Start receiving.  Idempotent
    pub async fn start(&self) {
        self.registrar.start().await;
    }

    /// Stop receiving.  Idempotent and never fails.  Pending queries are kept
    pub async fn stop(&self) {
        self.registrar.stop().await;
    }

    pub async fn is_started(&self) -> bool {
        self.registrar.is_started().await
    }

    /// Fire-and-forget event to `target`
    pub async fn send(&self, target: &str, event: &str, payload: &str) {
        let message = Envelope::Message {
            event: event.to_string(),
            payload: Some(payload.to_string()),
            sender: Some(self.identity.to_string()),
        };

        let channel = ChannelSet::for_identity(target).message;
        debug!("Sending message '{event}' on {channel}");
        self.transport.publish(&channel, message.encode()).await
            .unwrap_or_else(|e| error!("Failed to publish on {channel}: {e}"));
    }

    /// Query `target`.  `handler` sees each response and decides whether to
    /// keep listening.  The returned ID can cancel it with `remove_query`
    pub async fn query<F>(&self, target: &str, event: &str, payload: &str,
                          handler: F) -> CorrelationId
    where
        F: FnMut(Option<&str>) -> ResponseAction + Send + 'static,
    {
        let correlation_id = self.table.register(Box::new(handler)).await;

        let query = Envelope::Query {
            event: event.to_string(),
            payload: Some(payload.to_string()),
            correlation_id: correlation_id.clone(),
            sender: Some(self.identity.to_string()),
        };

        let channel = ChannelSet::for_identity(target).query;
        debug!("Sending query '{event}' ({correlation_id}) on {channel}");

        match self.transport.publish(&channel, query.encode()).await {
            Ok(()) => {
                if let Some(expiry) = self.pending_expiry {
                    self.schedule_expiry(correlation_id.clone(), expiry);
                }
            }
            Err(e) => {
                // Nobody can ever answer it
                error!("Failed to publish on {channel}: {e}");
                self.table.remove(&correlation_id).await;
            }
        }

        correlation_id
    }

    /// Cancel a query.  Unknown IDs are ignored
    pub async fn remove_query(&self, id: &CorrelationId) {
        self.table.remove(id).await;
    }

    pub async fn is_pending(&self, id: &CorrelationId) -> bool {
        self.table.contains(id).await
    }

    pub async fn pending_count(&self) -> usize {
        self.table.len().await
    }

    fn schedule_expiry(&self, id: CorrelationId, expiry: Duration) {
        let table = self.table.clone();
        tokio::spawn(async move {
            tokio::time::sleep(expiry).await;
            if table.remove(&id).await {
                debug!("Query {id} expired");
            }
        });
    }
}
