//! Subscribes and unsubscribes a bus's three channels as one unit
use futures::future::BoxFuture;
use intent_messenger_sdk::{Attachments, ChannelSet, Kind, Receiver, Transport};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::router::Router;

/// Channel registrar
///
/// A transport which delivers inside `publish` nests deliveries when a bus
/// answers itself, taking the read guard twice; a `stop` queued between the
/// two would deadlock.  Real transports deliver from their own tasks.
pub struct Registrar {
    transport: Arc<dyn Transport>,

    /// Channel and receiver for each kind, in subscription order
    subscriptions: Vec<(String, Arc<Receiver>)>,

    /// Started flag.  Deliveries hold a read guard for their whole dispatch,
    /// start and stop hold the write guard
    registered: Arc<RwLock<bool>>,
}

impl Registrar {
    pub fn new(channels: &ChannelSet, transport: Arc<dyn Transport>,
               router: Arc<Router>) -> Self {
        let registered = Arc::new(RwLock::new(false));

        let subscriptions = channels.iter()
            .map(|(kind, channel)| {
                (channel.to_string(), Self::receiver(kind, registered.clone(), router.clone()))
            })
            .collect();

        Self { transport, subscriptions, registered }
    }

    // Receiver for one kind, gated on the started flag
    fn receiver(kind: Kind, registered: Arc<RwLock<bool>>, router: Arc<Router>)
                -> Arc<Receiver> {
        Arc::new(move |channel: &str, attachments: Arc<Attachments>| -> BoxFuture<'static, ()> {
            let registered = registered.clone();
            let router = router.clone();
            let channel = channel.to_string();

            Box::pin(async move {
                let registered = registered.read().await;
                if !*registered {
                    debug!("Not started - {kind} on {channel} dropped");
                    return;
                }

                router.route(kind, &channel, &attachments).await;
            })
        })
    }

    pub async fn is_started(&self) -> bool {
        *self.registered.read().await
    }

    /// Subscribe all three channels.  No-op if already started; if any
    /// subscribe fails the others are undone and we stay stopped
    pub async fn start(&self) {
        let mut registered = self.registered.write().await;
        if *registered {
            debug!("Already started");
            return;
        }

        for (index, (channel, receiver)) in self.subscriptions.iter().enumerate() {
            if let Err(e) = self.transport.subscribe(channel, receiver.clone()).await {
                error!("Failed to subscribe to {channel}: {e}");

                for (channel, receiver) in self.subscriptions[..index].iter() {
                    self.transport.unsubscribe(channel, receiver).await
                        .unwrap_or_else(|e| warn!("Rollback of {channel} failed: {e}"));
                }
                return;
            }
        }

        *registered = true;
        info!("Started on {}", self.channel_list());
    }

    /// Unsubscribe all three channels.  No-op if not started; unsubscribe
    /// failures are logged and otherwise ignored
    pub async fn stop(&self) {
        let mut registered = self.registered.write().await;
        if !*registered {
            debug!("Already stopped");
            return;
        }

        // Clear first, so nothing delivered during unsubscribe is handled
        *registered = false;

        for (channel, receiver) in self.subscriptions.iter() {
            self.transport.unsubscribe(channel, receiver).await
                .unwrap_or_else(|e| warn!("Failed to unsubscribe from {channel}: {e}"));
        }

        info!("Stopped on {}", self.channel_list());
    }

    fn channel_list(&self) -> String {
        self.subscriptions.iter()
            .map(|(channel, _)| channel.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

// -- Tests --
#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation_table::CorrelationTable;
    use intent_messenger_sdk::mock_transport::MockTransport;
    use async_trait::async_trait;
    use intent_messenger_sdk::envelope::KEY_EVENT;
    use intent_messenger_sdk::{Listener, ReplyChannel, ResponseAction};
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Notify;
    use tokio::time::{sleep, timeout, Duration};
    use tracing::Level;

    // Listener which holds each message until released
    #[derive(Default)]
    struct GatedListener {
        entered: Notify,
        release: Notify,
        finished: AtomicBool,
    }

    #[async_trait]
    impl Listener for GatedListener {
        async fn on_message(&self, _event: &str, _payload: Option<&str>) {
            self.entered.notify_one();
            self.release.notified().await;
            self.finished.store(true, Ordering::SeqCst);
        }

        async fn on_query(&self, _event: &str, _payload: Option<&str>, _reply: ReplyChannel) {}
    }

    // Helper to set up a registrar for identity "a" over a mock transport
    struct TestSetup {
        mock: Arc<MockTransport>,
        channels: ChannelSet,
        table: Arc<CorrelationTable>,
        router: Arc<Router>,
        registrar: Arc<Registrar>,
    }

    impl TestSetup {
        fn new() -> Self {
            // Set up tracing
            let _ = tracing_subscriber::fmt()
                .with_max_level(Level::DEBUG)
                .with_test_writer()
                .try_init();

            let mock = Arc::new(MockTransport::new());
            let table = Arc::new(CorrelationTable::new());
            let router = Arc::new(Router::new(mock.clone(), table.clone()));
            let channels = ChannelSet::for_identity("a");
            let registrar = Arc::new(Registrar::new(&channels, mock.clone(), router.clone()));

            Self { mock, channels, table, router, registrar }
        }

        async fn receiver_for(&self, channel: &str) -> Arc<Receiver> {
            self.mock.subscriptions.lock().await.iter()
                .find(|sub| sub.channel == channel)
                .map(|sub| sub.receiver.clone())
                .unwrap()
        }

        async fn live_subscriptions(&self) -> Vec<usize> {
            let mut counts = Vec::new();
            for (_, channel) in self.channels.iter() {
                counts.push(self.mock.subscriber_count(channel).await);
            }
            counts
        }
    }

    #[tokio::test]
    async fn start_subscribes_all_three_channels() {
        let setup = TestSetup::new();

        setup.registrar.start().await;

        assert!(setup.registrar.is_started().await);
        assert_eq!(*setup.mock.subscribes.lock().await, vec![
            "a.messenger.action.message".to_string(),
            "a.messenger.action.query".to_string(),
            "a.messenger.action.response".to_string(),
        ]);
    }

    #[tokio::test]
    async fn double_start_subscribes_once() {
        let setup = TestSetup::new();

        setup.registrar.start().await;
        setup.registrar.start().await;

        assert_eq!(setup.mock.subscribes.lock().await.len(), 3);
        assert_eq!(setup.live_subscriptions().await, vec![1, 1, 1]);
    }

    #[tokio::test]
    async fn stop_when_stopped_does_nothing() {
        let setup = TestSetup::new();

        setup.registrar.stop().await;

        assert!(!setup.registrar.is_started().await);
        assert!(setup.mock.unsubscribes.lock().await.is_empty());
    }

    #[tokio::test]
    async fn double_stop_unsubscribes_once() {
        let setup = TestSetup::new();

        setup.registrar.start().await;
        setup.registrar.stop().await;
        setup.registrar.stop().await;

        assert!(!setup.registrar.is_started().await);
        assert_eq!(setup.mock.unsubscribes.lock().await.len(), 3);
        assert_eq!(setup.live_subscriptions().await, vec![0, 0, 0]);
    }

    #[tokio::test]
    async fn failed_subscribe_rolls_back() {
        let setup = TestSetup::new();
        setup.mock.fail_subscribe("a.messenger.action.query").await;

        setup.registrar.start().await;

        assert!(!setup.registrar.is_started().await);
        assert_eq!(setup.live_subscriptions().await, vec![0, 0, 0]);
        assert_eq!(*setup.mock.unsubscribes.lock().await,
                   vec!["a.messenger.action.message".to_string()]);
    }

    #[tokio::test]
    async fn unsubscribe_failures_are_swallowed() {
        let setup = TestSetup::new();
        setup.registrar.start().await;

        // Transport forgets everything behind our back
        setup.mock.shutdown().await.unwrap();

        setup.registrar.stop().await;
        assert!(!setup.registrar.is_started().await);

        // And can be started again afterwards
        setup.registrar.start().await;
        assert!(setup.registrar.is_started().await);
        assert_eq!(setup.live_subscriptions().await, vec![1, 1, 1]);
    }

    #[tokio::test]
    async fn delivery_after_stop_is_dropped() {
        let setup = TestSetup::new();
        setup.registrar.start().await;

        let calls = Arc::new(std::sync::Mutex::new(0));
        let counted = calls.clone();
        let id = setup.table.register(Box::new(move |_: Option<&str>| {
            *counted.lock().unwrap() += 1;
            ResponseAction::Continue
        })).await;

        // Keep hold of the response receiver as if a delivery were in flight
        let receiver = setup.receiver_for("a.messenger.action.response").await;

        let response = Attachments::from([("id".to_string(), id.as_str().to_string())]);
        receiver("a.messenger.action.response", Arc::new(response.clone())).await;
        assert_eq!(*calls.lock().unwrap(), 1);

        setup.registrar.stop().await;
        receiver("a.messenger.action.response", Arc::new(response)).await;
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn stop_waits_for_delivery_in_flight() {
        let setup = TestSetup::new();
        let listener = Arc::new(GatedListener::default());
        setup.router.set_listener(listener.clone()).await;
        setup.registrar.start().await;

        let receiver = setup.receiver_for("a.messenger.action.message").await;
        let message = Attachments::from([(KEY_EVENT.to_string(), "hello".to_string())]);
        let delivery = tokio::spawn(async move {
            receiver("a.messenger.action.message", Arc::new(message)).await;
        });
        listener.entered.notified().await;

        let registrar = setup.registrar.clone();
        let stopping = tokio::spawn(async move { registrar.stop().await });

        // Stop queues behind the delivery
        sleep(Duration::from_millis(50)).await;
        assert!(!stopping.is_finished());
        assert!(!listener.finished.load(Ordering::SeqCst));

        listener.release.notify_one();
        timeout(Duration::from_secs(1), delivery).await.unwrap().unwrap();
        assert!(listener.finished.load(Ordering::SeqCst));

        timeout(Duration::from_secs(1), stopping).await.unwrap().unwrap();
        assert!(!setup.registrar.is_started().await);
        assert_eq!(setup.live_subscriptions().await, vec![0, 0, 0]);
    }
}
