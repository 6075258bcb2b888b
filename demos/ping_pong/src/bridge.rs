//! Host bridge - JSON method calls from the embedding view become messenger
//! sends and queries, and inbound traffic goes back out as view events
use anyhow::{bail, Result};
use async_trait::async_trait;
use intent_messenger::Messenger;
use intent_messenger_sdk::{CorrelationId, Listener, ReplyChannel, ResponseAction};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Arguments to `sendMessage`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendMessage {
    target_package: String,
    event: String,

    #[serde(default)]
    data: String,
}

/// Arguments to `sendQuery`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendQuery {
    target_package: String,
    event: String,

    #[serde(default)]
    data: String,

    /// Keep receiving responses after the first
    #[serde(default)]
    subscribe: bool,
}

/// Something for the view to deal with
pub enum ViewEvent {
    /// Inbound fire-and-forget message
    Message { event: String, data: Option<String> },

    /// Inbound query, answered through `reply`
    Query { event: String, data: Option<String>, reply: ReplyChannel },

    /// Response to one of the view's own queries, tagged with its event
    Response { event: String, data: Option<String> },
}

/// Bridge between one view and one messenger
pub struct HostBridge {
    messenger: Arc<Messenger>,
    view: mpsc::UnboundedSender<ViewEvent>,
}

impl HostBridge {
    pub fn new(messenger: Arc<Messenger>, view: mpsc::UnboundedSender<ViewEvent>) -> Self {
        Self { messenger, view }
    }

    /// Attach to the messenger so inbound traffic reaches the view
    pub async fn attach(&self) {
        self.messenger.set_listener(Arc::new(ViewListener { view: self.view.clone() })).await;
    }

    /// Handle a method call from the view.  `sendQuery` gives back the
    /// query's ID, `sendMessage` nothing
    pub async fn call(&self, method: &str, arguments: &str) -> Result<Option<CorrelationId>> {
        match method {
            "sendMessage" => {
                let args: SendMessage = serde_json::from_str(arguments)?;
                self.messenger.send(&args.target_package, &args.event, &args.data).await;
                Ok(None)
            }

            "sendQuery" => {
                let args: SendQuery = serde_json::from_str(arguments)?;
                let view = self.view.clone();
                let event = args.event.clone();
                let subscribe = args.subscribe;

                let id = self.messenger.query(&args.target_package, &args.event, &args.data,
                                              move |data: Option<&str>| {
                    let response = ViewEvent::Response {
                        event: event.clone(),
                        data: data.map(str::to_string),
                    };

                    if view.send(response).is_err() {
                        debug!("View has gone - response to '{event}' dropped");
                        return ResponseAction::Done;
                    }

                    if subscribe { ResponseAction::Continue } else { ResponseAction::Done }
                }).await;

                info!("View query '{}' to {} is {id}", args.event, args.target_package);
                Ok(Some(id))
            }

            _ => bail!("Unknown host method {method}"),
        }
    }
}

/// Listener forwarding everything to the view
struct ViewListener {
    view: mpsc::UnboundedSender<ViewEvent>,
}

#[async_trait]
impl Listener for ViewListener {
    async fn on_message(&self, event: &str, payload: Option<&str>) {
        let message = ViewEvent::Message {
            event: event.to_string(),
            data: payload.map(str::to_string),
        };

        if self.view.send(message).is_err() {
            debug!("View has gone - message '{event}' dropped");
        }
    }

    async fn on_query(&self, event: &str, payload: Option<&str>, reply: ReplyChannel) {
        let query = ViewEvent::Query {
            event: event.to_string(),
            data: payload.map(str::to_string),
            reply,
        };

        if self.view.send(query).is_err() {
            debug!("View has gone - query '{event}' dropped");
        }
    }
}
