//! Sample host for the intent messenger - ping/pong example
//! Two buses on one transport; the ping side is driven through the host
//! bridge the way an embedded view would drive it

use anyhow::Result;
use config::{Config, Environment, File};
use intent_messenger::{create_transport, get_sub_config, Messenger};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use tracing::{info, warn};
use tracing_subscriber;

// Modules in the same crate
mod bridge;

use bridge::{HostBridge, ViewEvent};

/// Standard main
#[tokio::main]
pub async fn main() -> Result<()> {

    // Initialise tracing
    tracing_subscriber::fmt::init();

    info!("Intent messenger - ping/pong example host");

    // Read the config
    let config = Config::builder()
        .add_source(File::with_name("ping_pong"))
        .add_source(Environment::with_prefix("PING_PONG"))
        .build()?;

    let pongs = config.get::<usize>("demo.pongs").unwrap_or(3);

    // One transport shared by both buses
    let transport = create_transport(&config).await?;

    // Pong side: a view which answers every ping `pongs` times
    let pong = Arc::new(Messenger::from_config(&get_sub_config(&config, "pong"),
                                               transport.clone())?);
    let (pong_tx, mut pong_view) = mpsc::unbounded_channel();
    HostBridge::new(pong.clone(), pong_tx).attach().await;
    pong.start().await;

    tokio::spawn(async move {
        while let Some(event) = pong_view.recv().await {
            match event {
                ViewEvent::Message { event, data } =>
                    info!("Pong view got message '{event}': {data:?}"),

                ViewEvent::Query { event, data, reply } => {
                    info!("Pong view got query '{event}': {data:?}");
                    for n in 1..=pongs {
                        reply.respond(&format!("pong {n}")).await;
                    }
                }

                ViewEvent::Response { .. } => {}
            }
        }
    });

    // Ping side, driven through the bridge
    let ping = Arc::new(Messenger::from_config(&get_sub_config(&config, "ping"),
                                               transport.clone())?);
    let (ping_tx, mut ping_view) = mpsc::unbounded_channel();
    let bridge = HostBridge::new(ping.clone(), ping_tx);
    bridge.attach().await;
    ping.start().await;

    let target = pong.identity().to_string();

    bridge.call("sendMessage", &json!({
        "targetPackage": target,
        "event": "hello",
        "data": "from ping",
    }).to_string()).await?;

    let query = bridge.call("sendQuery", &json!({
        "targetPackage": target,
        "event": "ping",
        "data": "are you there?",
        "subscribe": true,
    }).to_string()).await?;

    // Collect the pongs
    for _ in 0..pongs {
        match timeout(Duration::from_secs(5), ping_view.recv()).await {
            Ok(Some(ViewEvent::Response { event, data })) =>
                info!("Ping view got response to '{event}': {data:?}"),
            Ok(Some(_)) => warn!("Ping view got something unexpected"),
            Ok(None) => break,
            Err(_) => {
                warn!("Timed out waiting for pongs");
                break;
            }
        }
    }

    // Subscribed queries stay until we let them go
    if let Some(id) = query {
        info!("Ping has {} pending queries - removing {id}", ping.pending_count().await);
        ping.remove_query(&id).await;
    }

    // Suspend and resume, as a host going into the background would
    info!("Pausing ping");
    ping.stop().await;
    info!("Resuming ping");
    ping.start().await;

    bridge.call("sendMessage", &json!({
        "targetPackage": target,
        "event": "hello",
        "data": "back again",
    }).to_string()).await?;

    // Let the last message get there
    tokio::time::sleep(Duration::from_millis(100)).await;

    ping.stop().await;
    pong.stop().await;
    transport.shutdown().await?;

    // Bye!
    info!("Exiting");
    Ok(())
}
