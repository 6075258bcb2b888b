// In-process broadcast transport with multi-threaded async workers
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use intent_messenger_sdk::{Attachments, Receiver, Transport};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info};

/// One receiver invocation, queued for a worker
type Delivery = (Arc<Receiver>, String, Arc<Attachments>);

pub struct InMemoryTransport {

    // Map of receivers by channel
    subscribers: Arc<Mutex<HashMap<String, Vec<Arc<Receiver>>>>>,

    // Sender for published attachments
    sender: mpsc::UnboundedSender<(String, Arc<Attachments>)>,
}

impl InMemoryTransport {
    /// Create with the given number of workers - must be inside a tokio runtime
    pub fn new(num_workers: usize) -> Self {
        let num_workers = num_workers.max(1);
        let (sender, mut receiver) = mpsc::unbounded_channel::<(String, Arc<Attachments>)>();

        info!("Creating in-memory transport with {num_workers} workers");

        let subscribers: Arc<Mutex<HashMap<String, Vec<Arc<Receiver>>>>> =
            Arc::new(Mutex::new(HashMap::new()));

        // Create a task queue for each worker
        let mut worker_txs = Vec::new();
        for _ in 0..num_workers {
            let (worker_tx, mut worker_rx) = mpsc::unbounded_channel::<Delivery>();
            worker_txs.push(worker_tx);

            // Spawn worker tasks that run individual receiver invocations
            tokio::spawn(async move {
                while let Some((receiver, channel, attachments)) = worker_rx.recv().await {
                    receiver(&channel, attachments).await;
                }
            });
        }

        // Single dispatcher task fanning out to the workers
        let subs_clone = subscribers.clone();
        tokio::spawn(async move {
            let mut round_robin_index = 0;

            while let Some((channel, attachments)) = receiver.recv().await {
                let subscribers = subs_clone.lock().await;
                let Some(receivers) = subscribers.get(&channel) else {
                    debug!("No receivers on {channel}");
                    continue;
                };

                for receiver in receivers {
                    let worker_tx = &worker_txs[round_robin_index % num_workers];
                    if let Err(e) = worker_tx.send((receiver.clone(), channel.clone(),
                                                    attachments.clone())) {
                        error!("Failed to queue delivery on {channel}: {e}");
                    }

                    round_robin_index += 1;
                }
            }
        });

        Self { subscribers, sender }
    }
}

#[async_trait]
impl Transport for InMemoryTransport {

    async fn publish(&self, channel: &str, attachments: Attachments) -> Result<()> {
        self.sender.send((channel.to_string(), Arc::new(attachments)))
            .map_err(|_| anyhow!("In-memory transport dispatcher has gone"))
    }

    async fn subscribe(&self, channel: &str, receiver: Arc<Receiver>) -> Result<()> {
        let mut subscribers = self.subscribers.lock().await;
        let receivers = subscribers.entry(channel.to_string()).or_default();

        if receivers.iter().any(|existing| Arc::ptr_eq(existing, &receiver)) {
            bail!("Receiver already subscribed to {channel}");
        }

        receivers.push(receiver);
        Ok(())
    }

    async fn unsubscribe(&self, channel: &str, receiver: &Arc<Receiver>) -> Result<()> {
        let mut subscribers = self.subscribers.lock().await;
        let receivers = subscribers.get_mut(channel)
            .ok_or_else(|| anyhow!("Nothing subscribed to {channel}"))?;

        let index = receivers.iter()
            .position(|existing| Arc::ptr_eq(existing, receiver))
            .ok_or_else(|| anyhow!("Receiver not subscribed to {channel}"))?;

        receivers.remove(index);
        if receivers.is_empty() {
            subscribers.remove(channel);
        }
        Ok(())
    }

    /// Shut down, clearing all receivers
    async fn shutdown(&self) -> Result<()> {
        self.subscribers.lock().await.clear();
        Ok(())
    }
}
