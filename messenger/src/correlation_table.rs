//! Table of in-flight queries, by correlation ID
use intent_messenger_sdk::{CorrelationId, ResponseAction, ResponseHandler};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError};
use tokio::sync::Mutex;
use tracing::debug;

/// Query awaiting responses
struct PendingQuery {
    /// Serializes invocations for this ID; None once the handler said Done.
    /// Held only around the synchronous handler call, never across an await
    handler: std::sync::Mutex<Option<Box<ResponseHandler>>>,
}

/// Correlation table
pub struct CorrelationTable {
    /// Active queries, by ID
    pending: Mutex<HashMap<CorrelationId, Arc<PendingQuery>>>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Store a handler under a fresh ID
    pub async fn register(&self, handler: Box<ResponseHandler>) -> CorrelationId {
        let id = CorrelationId::generate();
        let query = Arc::new(PendingQuery {
            handler: std::sync::Mutex::new(Some(handler)),
        });

        self.pending.lock().await.insert(id.clone(), query);
        debug!("Registered query {id}");
        id
    }

    /// Pass a response to the handler for this ID, if there still is one
    pub async fn resolve(&self, id: &CorrelationId, payload: Option<&str>) {

        // Hold the map lock only for the lookup, not the handler call
        let Some(query) = self.pending.lock().await.get(id).cloned() else {
            debug!("No pending query {id} - response dropped");
            return;
        };

        let action = {
            let mut slot = query.handler.lock().unwrap_or_else(PoisonError::into_inner);
            let Some(handler) = slot.as_mut() else {
                debug!("Query {id} already done - response dropped");
                return;
            };

            let action = handler(payload);
            if action == ResponseAction::Done {
                *slot = None;
            }
            action
        };

        if action == ResponseAction::Done {
            let mut pending = self.pending.lock().await;

            // Only our own entry - a remove may have got there first
            if pending.get(id).is_some_and(|current| Arc::ptr_eq(current, &query)) {
                pending.remove(id);
            }
            debug!("Query {id} done");
        }
    }

    /// Forget a query.  Removing an unknown ID is a no-op
    pub async fn remove(&self, id: &CorrelationId) -> bool {
        let removed = self.pending.lock().await.remove(id).is_some();
        if removed {
            debug!("Removed query {id}");
        }
        removed
    }

    pub async fn contains(&self, id: &CorrelationId) -> bool {
        self.pending.lock().await.contains_key(id)
    }

    pub async fn len(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.pending.lock().await.is_empty()
    }
}

impl Default for CorrelationTable {
    fn default() -> Self {
        Self::new()
    }
}
