//! Generic Transport trait for any broadcast medium addressed by channel name
use anyhow::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Generic key-value attachments carried by every delivery
pub type Attachments = BTreeMap<String, String>;

/// Receiver function type - takes the channel it arrived on and the attachments
pub type Receiver = dyn Fn(&str, Arc<Attachments>) ->
    BoxFuture<'static, ()> + Send + Sync + 'static;

/// Unordered, at-most-once broadcast transport
///
/// Receivers are identified by pointer identity, so the same `Arc` must be
/// passed to `unsubscribe` as was given to `subscribe`.
#[async_trait]
pub trait Transport: Send + Sync {

    /// Publish attachments to everyone subscribed on a channel.  No
    /// acknowledgement - Ok means only that the transport accepted it
    async fn publish(&self, channel: &str, attachments: Attachments) -> Result<()>;

    /// Subscribe a receiver to a channel.  Fails if this receiver is
    /// already subscribed there
    async fn subscribe(&self, channel: &str, receiver: Arc<Receiver>) -> Result<()>;

    /// Unsubscribe a receiver.  Fails if it is not currently subscribed
    async fn unsubscribe(&self, channel: &str, receiver: &Arc<Receiver>) -> Result<()>;

    /// Shut down, dropping all subscriptions
    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}
