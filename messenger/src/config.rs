//! Messenger and transport configuration
use anyhow::{anyhow, bail, Result};
use config::Config;
use intent_messenger_sdk::Transport;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use crate::in_memory_transport::InMemoryTransport;
use crate::rabbit_mq_transport::RabbitMqTransport;

const DEFAULT_WORKERS: usize = 4;
const DEFAULT_AMQP_ADDRESS: &str = "amqp://127.0.0.1:5672/%2f";

/// `[messenger]` section
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MessengerConfig {
    /// Our bus identity - required
    pub identity: String,

    /// Forget queries still pending after this long.  Absent means never
    #[serde(default)]
    pub pending_expiry_secs: Option<f64>,
}

impl MessengerConfig {
    pub fn from_config(config: &Config) -> Result<Self> {
        config.get::<MessengerConfig>("messenger")
            .map_err(|e| anyhow!("Bad [messenger] configuration: {e}"))
    }

    pub fn pending_expiry(&self) -> Result<Option<Duration>> {
        self.pending_expiry_secs
            .map(|secs| Duration::try_from_secs_f64(secs)
                 .ok()
                 .filter(|expiry| !expiry.is_zero())
                 .ok_or_else(|| anyhow!("Invalid pending-expiry-secs {secs}")))
            .transpose()
    }
}

/// Extract a sub-config as a new Config object.
/// Defaults to an empty Config if the path does not exist
pub fn get_sub_config(config: &Config, path: &str) -> Config {
    let Ok(table) = config.get_table(path) else {
        return Config::default();
    };

    table.into_iter()
        .try_fold(Config::builder(), |builder, (key, value)| builder.set_override(key, value))
        .and_then(|builder| builder.build())
        .unwrap_or_default()
}

fn default_class() -> String {
    "in-memory".to_string()
}

/// `[transport]` section
#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    /// in-memory or rabbit-mq
    #[serde(default = "default_class")]
    pub class: String,

    /// in-memory: number of delivery workers
    pub workers: Option<usize>,

    /// rabbit-mq: AMQP address
    pub address: Option<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self { class: default_class(), workers: None, address: None }
    }
}

impl TransportConfig {
    /// Read `[transport]`, defaulting to in-memory if absent
    pub fn from_config(config: &Config) -> Result<Self> {
        match config.get_table("transport") {
            Ok(_) => config.get::<TransportConfig>("transport")
                .map_err(|e| anyhow!("Bad [transport] configuration: {e}")),
            Err(_) => Ok(Self::default()),
        }
    }
}

/// Create the transport described by `[transport]`
pub async fn create_transport(config: &Config) -> Result<Arc<dyn Transport>> {
    let transport_config = TransportConfig::from_config(config)?;
    info!("Creating {} transport", transport_config.class);

    let transport: Arc<dyn Transport> = match transport_config.class.as_str() {
        // In-memory
        "in-memory" => Arc::new(InMemoryTransport::new(
            transport_config.workers.unwrap_or(DEFAULT_WORKERS))),

        // RabbitMQ
        "rabbit-mq" => {
            let address = transport_config.address
                .or_else(|| std::env::var("AMQP_ADDR").ok())
                .unwrap_or_else(|| DEFAULT_AMQP_ADDRESS.to_string());

            match RabbitMqTransport::connect(&address).await {
                Ok(transport) => Arc::new(transport),
                Err(e) => {
                    error!("Failed to create RabbitMQ transport: {e}");
                    return Err(e);
                }
            }
        }

        // Unknown
        class => bail!("Unknown transport class {class}"),
    };

    Ok(transport)
}

// -- Tests --
#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    fn config_from_toml(toml: &str) -> Config {
        Config::builder()
            .add_source(config::File::from_str(toml, FileFormat::Toml))
            .build()
            .unwrap()
    }

    #[test]
    fn sub_config_extracts_nested_messenger_section() {
        let config = config_from_toml(r#"
            [ping.messenger]
            identity = "org.example.ping"

            [pong.messenger]
            identity = "org.example.pong"
        "#);

        let ping = MessengerConfig::from_config(&get_sub_config(&config, "ping")).unwrap();
        let pong = MessengerConfig::from_config(&get_sub_config(&config, "pong")).unwrap();
        assert_eq!(ping.identity, "org.example.ping");
        assert_eq!(pong.identity, "org.example.pong");
    }

    #[test]
    fn sub_config_is_empty_for_missing_path() {
        let config = config_from_toml("[other]\nkey = \"value\"");
        let sub = get_sub_config(&config, "nonexistent");
        assert!(sub.get_string("key").is_err());
        assert!(MessengerConfig::from_config(&sub).is_err());
    }

    #[test]
    fn messenger_config_reads_identity_and_expiry() {
        let config = config_from_toml(r#"
            [messenger]
            identity = "org.example.ping"
            pending-expiry-secs = 2.5
        "#);

        let messenger_config = MessengerConfig::from_config(&config).unwrap();
        assert_eq!(messenger_config.identity, "org.example.ping");
        assert_eq!(messenger_config.pending_expiry().unwrap(),
                   Some(Duration::from_millis(2500)));
    }

    #[test]
    fn expiry_defaults_to_never() {
        let config = config_from_toml("[messenger]\nidentity = \"a\"");
        let messenger_config = MessengerConfig::from_config(&config).unwrap();
        assert_eq!(messenger_config.pending_expiry().unwrap(), None);
    }

    #[test]
    fn nonsense_expiry_is_rejected() {
        for bad in ["0", "-1"] {
            let config = config_from_toml(
                &format!("[messenger]\nidentity = \"a\"\npending-expiry-secs = {bad}"));
            let messenger_config = MessengerConfig::from_config(&config).unwrap();
            assert!(messenger_config.pending_expiry().is_err());
        }
    }

    #[test]
    fn missing_identity_is_an_error() {
        let config = config_from_toml("[messenger]\npending-expiry-secs = 1");
        assert!(MessengerConfig::from_config(&config).is_err());
    }

    #[test]
    fn transport_defaults_to_in_memory() {
        let config = config_from_toml("[messenger]\nidentity = \"a\"");
        let transport_config = TransportConfig::from_config(&config).unwrap();
        assert_eq!(transport_config.class, "in-memory");
        assert_eq!(transport_config.workers, None);
    }

    #[tokio::test]
    async fn unknown_transport_class_fails() {
        let config = config_from_toml("[transport]\nclass = \"carrier-pigeon\"");
        assert!(create_transport(&config).await.is_err());
    }

    #[tokio::test]
    async fn in_memory_transport_is_created() {
        let config = config_from_toml("[transport]\nclass = \"in-memory\"\nworkers = 2");
        assert!(create_transport(&config).await.is_ok());
    }
}
