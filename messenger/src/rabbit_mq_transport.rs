//! Transport implementation for RabbitMQ
//!
//! Each channel name is a fanout exchange.  Every subscription gets its own
//! AMQP channel with an exclusive, server-named queue bound to the exchange,
//! so every subscriber in every process sees every publish.
use anyhow::{bail, Result};
use async_trait::async_trait;
use futures::StreamExt;
use intent_messenger_sdk::{Attachments, Receiver, Transport};
use lapin::{
    options::{BasicConsumeOptions, BasicPublishOptions, ExchangeDeclareOptions,
              QueueBindOptions, QueueDeclareOptions},
    types::FieldTable,
    BasicProperties, Channel, Connection, ConnectionProperties, Consumer, ExchangeKind,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// One live subscription
struct RabbitSubscription {
    channel: String,
    receiver: Arc<Receiver>,
    amqp_channel: Channel,       // Closing this drops the consumer and queue
    consumer: JoinHandle<()>,
}

/// RabbitMQ transport
pub struct RabbitMqTransport {
    connection: Arc<Mutex<Connection>>,  // RabbitMQ connection
    channel: Arc<Mutex<Channel>>,        // RabbitMQ outgoing channel
    subscriptions: Arc<Mutex<Vec<RabbitSubscription>>>,
}

impl RabbitMqTransport {

    /// Connect to the server at `address`
    pub async fn connect(address: &str) -> Result<Self> {
        info!("Connecting to RabbitMQ at {address}");

        let properties = ConnectionProperties::default()
            .with_executor(tokio_executor_trait::Tokio::current());
        let connection = Connection::connect(address, properties).await?;

        info!("RabbitMQ connected");

        // Create a channel for outgoing messages
        let channel = connection.create_channel().await?;

        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
            channel: Arc::new(Mutex::new(channel)),
            subscriptions: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// Bind a private queue to the channel's exchange and consume it
    async fn consume(amqp_channel: &Channel, channel: &str) -> Result<Consumer> {
        Self::declare_exchange(amqp_channel, channel).await?;

        // Private queue, gone when the AMQP channel closes
        let queue = amqp_channel
            .queue_declare("",
                           QueueDeclareOptions { exclusive: true, auto_delete: true,
                                                 ..QueueDeclareOptions::default() },
                           FieldTable::default())
            .await?;
        amqp_channel
            .queue_bind(queue.name().as_str(), channel, "",
                        QueueBindOptions::default(), FieldTable::default())
            .await?;

        let consumer = amqp_channel
            .basic_consume(queue.name().as_str(), "",
                           BasicConsumeOptions { no_ack: true,
                                                 ..BasicConsumeOptions::default() },
                           FieldTable::default())
            .await?;

        debug!("Consuming {channel} via queue {}", queue.name().as_str());
        Ok(consumer)
    }

    // Exchanges are declared by both sides - declaring twice is harmless
    async fn declare_exchange(amqp_channel: &Channel, name: &str) -> Result<()> {
        amqp_channel
            .exchange_declare(name, ExchangeKind::Fanout,
                              ExchangeDeclareOptions::default(), FieldTable::default())
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Transport for RabbitMqTransport {

    /// Publish attachments to the channel's exchange
    async fn publish(&self, channel: &str, attachments: Attachments) -> Result<()> {
        let amqp_channel = self.channel.lock().await;
        Self::declare_exchange(&amqp_channel, channel).await?;

        // Serialise the attachments
        let payload = serde_json::to_vec(&attachments)?;

        amqp_channel
            .basic_publish(
                channel,
                "",
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default(),
            )
            .await?
            .await?;

        Ok(())
    }

    async fn subscribe(&self, channel: &str, receiver: Arc<Receiver>) -> Result<()> {
        let mut subscriptions = self.subscriptions.lock().await;
        if subscriptions.iter()
            .any(|sub| sub.channel == channel && Arc::ptr_eq(&sub.receiver, &receiver)) {
            bail!("Receiver already subscribed to {channel}");
        }

        // Create a new AMQP channel for this subscription
        let amqp_channel = self.connection.lock().await.create_channel().await?;
        let mut consumer = match Self::consume(&amqp_channel, channel).await {
            Ok(consumer) => consumer,
            Err(e) => {
                amqp_channel.close(200, "Subscribe failed").await
                    .unwrap_or_else(|e| warn!("Failed to close channel for {channel}: {e}"));
                return Err(e);
            }
        };

        let channel_name = channel.to_string();
        let consumer_receiver = receiver.clone();
        let consumer_task = tokio::spawn(async move {
            while let Some(delivery) = consumer.next().await {
                let delivery = match delivery {
                    Ok(delivery) => delivery,
                    Err(e) => {
                        error!("Consumer on {channel_name} failed: {e}");
                        break;
                    }
                };

                match serde_json::from_slice::<Attachments>(&delivery.data) {
                    Ok(attachments) =>
                        consumer_receiver(&channel_name, Arc::new(attachments)).await,
                    Err(e) => warn!("Undecodable delivery on {channel_name}: {e}"),
                }
            }
        });

        subscriptions.push(RabbitSubscription {
            channel: channel.to_string(),
            receiver,
            amqp_channel,
            consumer: consumer_task,
        });

        Ok(())
    }

    async fn unsubscribe(&self, channel: &str, receiver: &Arc<Receiver>) -> Result<()> {
        let subscription = {
            let mut subscriptions = self.subscriptions.lock().await;
            match subscriptions.iter()
                .position(|sub| sub.channel == channel && Arc::ptr_eq(&sub.receiver, receiver)) {
                Some(index) => subscriptions.remove(index),
                None => bail!("Receiver not subscribed to {channel}"),
            }
        };

        subscription.consumer.abort();
        subscription.amqp_channel.close(200, "Unsubscribed").await?;
        Ok(())
    }

    /// Shut down the connection
    async fn shutdown(&self) -> Result<()> {
        info!("Shutting down RabbitMQ transport");

        for subscription in self.subscriptions.lock().await.drain(..) {
            subscription.consumer.abort();
        }

        // Close the connection
        let connection = self.connection.lock().await;
        connection.close(200, "Goodbye").await?;
        Ok(())
    }
}
