//! Mock transport for tests - records every call and delivers synchronously
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::transport::{Attachments, Receiver, Transport};

pub struct PublishRecord {
    pub channel: String,
    pub attachments: Attachments,
}

pub struct SubscriptionRecord {
    pub channel: String,
    pub receiver: Arc<Receiver>,
}

pub struct MockTransport {
    pub publishes: Arc<Mutex<Vec<PublishRecord>>>,
    pub subscriptions: Arc<Mutex<Vec<SubscriptionRecord>>>,
    pub subscribes: Arc<Mutex<Vec<String>>>,     // every subscribe call, by channel
    pub unsubscribes: Arc<Mutex<Vec<String>>>,   // every unsubscribe call, by channel
    pub shutdowns: Arc<Mutex<u16>>,              // just count them
    failing: Arc<Mutex<HashSet<String>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            publishes: Arc::new(Mutex::new(Vec::new())),
            subscriptions: Arc::new(Mutex::new(Vec::new())),
            subscribes: Arc::new(Mutex::new(Vec::new())),
            unsubscribes: Arc::new(Mutex::new(Vec::new())),
            shutdowns: Arc::new(Mutex::new(0)),
            failing: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Make future subscribes to this channel fail
    pub async fn fail_subscribe(&self, channel: &str) {
        self.failing.lock().await.insert(channel.to_string());
    }

    /// Number of live subscriptions on a channel
    pub async fn subscriber_count(&self, channel: &str) -> usize {
        self.subscriptions.lock().await.iter()
            .filter(|sub| sub.channel == channel)
            .count()
    }

    /// Deliver raw attachments to a channel without recording a publish
    pub async fn inject(&self, channel: &str, attachments: Attachments) {
        Self::deliver(&self.subscriptions, channel, attachments).await;
    }

    async fn deliver(subscriptions: &Mutex<Vec<SubscriptionRecord>>, channel: &str,
                     attachments: Attachments) {
        // Copy the receivers before calling them - a receiver may publish in turn
        let receivers: Vec<Arc<Receiver>> = {
            let subscriptions = subscriptions.lock().await;
            subscriptions.iter()
                .filter(|sub| sub.channel == channel)
                .map(|sub| sub.receiver.clone())
                .collect()
        };

        let attachments = Arc::new(attachments);
        for receiver in receivers {
            receiver(channel, attachments.clone()).await;
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {

    async fn publish(&self, channel: &str, attachments: Attachments) -> Result<()> {
        debug!("Mock publish on {channel}");

        // Limit lock because we can be re-entrant
        {
            let mut publishes = self.publishes.lock().await;
            publishes.push(PublishRecord {
                channel: channel.to_string(),
                attachments: attachments.clone(),
            });
        }

        Self::deliver(&self.subscriptions, channel, attachments).await;
        Ok(())
    }

    async fn subscribe(&self, channel: &str, receiver: Arc<Receiver>) -> Result<()> {
        debug!("Mock subscribe on {channel}");
        self.subscribes.lock().await.push(channel.to_string());

        if self.failing.lock().await.contains(channel) {
            bail!("Subscribe to {channel} refused");
        }

        let mut subscriptions = self.subscriptions.lock().await;
        if subscriptions.iter()
            .any(|sub| sub.channel == channel && Arc::ptr_eq(&sub.receiver, &receiver)) {
            bail!("Receiver already subscribed to {channel}");
        }

        subscriptions.push(SubscriptionRecord { channel: channel.to_string(), receiver });
        Ok(())
    }

    async fn unsubscribe(&self, channel: &str, receiver: &Arc<Receiver>) -> Result<()> {
        debug!("Mock unsubscribe on {channel}");
        self.unsubscribes.lock().await.push(channel.to_string());

        let mut subscriptions = self.subscriptions.lock().await;
        match subscriptions.iter()
            .position(|sub| sub.channel == channel && Arc::ptr_eq(&sub.receiver, receiver)) {
            Some(index) => {
                subscriptions.remove(index);
                Ok(())
            }
            None => bail!("Receiver not subscribed to {channel}"),
        }
    }

    async fn shutdown(&self) -> Result<()> {
        *self.shutdowns.lock().await += 1;
        self.subscriptions.lock().await.clear();
        Ok(())
    }
}
