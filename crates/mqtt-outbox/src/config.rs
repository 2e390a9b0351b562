//! Configuration for the outbox.

use crate::codec::CodecConfig;
use crate::driver::DriverConfig;
use crate::error::{OutboxError, OutboxResult};
use crate::options::{generate_client_id, ConnectionOptions, LastWill, QoS};
use crate::template::TopicTemplate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The only protocol version the transport speaks.
pub const SUPPORTED_VERSION: &str = "3.1.1";

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Outbox configuration, as read from a JSON file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxConfig {
    /// MQTT server host name.
    pub host: String,

    /// Port to connect to. Defaults to 8883 with TLS, 1883 without.
    #[serde(default)]
    pub port: Option<u16>,

    /// Topic template messages are published to, e.g. `sensors/%{site}`.
    pub topic: String,

    /// Protocol version.
    #[serde(default = "default_version")]
    pub version: String,

    /// Start a clean session on connect.
    #[serde(default = "default_true")]
    pub clean_session: bool,

    /// Ask the broker to keep the last message for new subscribers.
    #[serde(default)]
    pub retain: bool,

    /// QoS of published messages: 0, 1 or 2.
    #[serde(default)]
    pub qos: u8,

    /// Client identifier, generated when absent.
    #[serde(default)]
    pub client_id: Option<String>,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Use TLS.
    #[serde(default)]
    pub ssl: bool,

    /// Client certificate (PEM).
    #[serde(default)]
    pub cert_file: Option<PathBuf>,

    /// Private key for the client certificate (PEM).
    #[serde(default)]
    pub key_file: Option<PathBuf>,

    /// Root CA certificate (PEM).
    #[serde(default)]
    pub ca_file: Option<PathBuf>,

    /// Seconds to wait before retrying after a failure.
    #[serde(default = "default_retry_interval")]
    pub connect_retry_interval: u64,

    /// Keep-alive interval in seconds.
    #[serde(default = "default_keep_alive")]
    pub keep_alive: u64,

    /// Seconds to wait for CONNACK or a publish acknowledgement.
    #[serde(default = "default_ack_timeout")]
    pub ack_timeout: u64,

    #[serde(default)]
    pub will_topic: Option<String>,

    #[serde(default)]
    pub will_payload: Option<String>,

    #[serde(default)]
    pub will_qos: u8,

    #[serde(default)]
    pub will_retain: bool,

    /// Retries of one event before a drain call gives up. Unbounded if absent.
    #[serde(default)]
    pub max_retries: Option<u32>,

    /// Maximum number of queued events. Unbounded if absent.
    #[serde(default)]
    pub max_pending: Option<usize>,

    /// Payload encoding.
    #[serde(default)]
    pub codec: CodecConfig,

    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_version() -> String {
    SUPPORTED_VERSION.to_string()
}

fn default_true() -> bool {
    true
}

fn default_retry_interval() -> u64 {
    10
}

fn default_keep_alive() -> u64 {
    15
}

fn default_ack_timeout() -> u64 {
    30
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

impl OutboxConfig {
    /// Configuration with the required fields set and defaults elsewhere.
    pub fn new(host: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: None,
            topic: topic.into(),
            version: default_version(),
            clean_session: true,
            retain: false,
            qos: 0,
            client_id: None,
            username: None,
            password: None,
            ssl: false,
            cert_file: None,
            key_file: None,
            ca_file: None,
            connect_retry_interval: default_retry_interval(),
            keep_alive: default_keep_alive(),
            ack_timeout: default_ack_timeout(),
            will_topic: None,
            will_payload: None,
            will_qos: 0,
            will_retain: false,
            max_retries: None,
            max_pending: None,
            codec: CodecConfig::default(),
            log_level: default_log_level(),
        }
    }

    /// Load configuration from a JSON file.
    pub fn load_from_file(path: &Path) -> OutboxResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: OutboxConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Override from environment variables. Only the log level can be
    /// overridden this way; everything else goes through the CLI.
    pub fn load_from_env(&mut self) {
        if let Ok(log_level) = std::env::var("MQTT_OUTBOX_LOG_LEVEL") {
            self.log_level = log_level;
        }
    }

    /// Check the configuration for values the transport cannot use.
    pub fn validate(&self) -> OutboxResult<()> {
        if self.host.trim().is_empty() {
            return Err(config_error("host must not be empty"));
        }
        if self.topic.trim().is_empty() {
            return Err(config_error("topic must not be empty"));
        }
        if self.version != SUPPORTED_VERSION {
            return Err(config_error(format!(
                "unsupported protocol version {:?}, only {} is supported",
                self.version, SUPPORTED_VERSION
            )));
        }
        QoS::try_from(self.qos).map_err(|e| config_error(format!("qos: {}", e)))?;
        QoS::try_from(self.will_qos).map_err(|e| config_error(format!("will_qos: {}", e)))?;
        if self.connect_retry_interval == 0 {
            return Err(config_error("connect_retry_interval must be at least 1 second"));
        }
        if self.keep_alive < 5 {
            return Err(config_error("keep_alive must be at least 5 seconds"));
        }
        if self.ack_timeout == 0 {
            return Err(config_error("ack_timeout must be at least 1 second"));
        }
        if self.cert_file.is_some() != self.key_file.is_some() {
            return Err(config_error("cert_file and key_file must be given together"));
        }
        if self.ssl && self.cert_file.is_some() && self.ca_file.is_none() {
            return Err(config_error("client certificates require ca_file"));
        }
        if self.will_payload.is_some() && self.will_topic.is_none() {
            return Err(config_error("will_payload requires will_topic"));
        }
        if self.max_pending == Some(0) {
            return Err(config_error("max_pending must be at least 1"));
        }
        Ok(())
    }

    /// Build the transport options.
    pub fn connection_options(&self) -> OutboxResult<ConnectionOptions> {
        self.validate()?;

        let last_will = match &self.will_topic {
            Some(topic) => Some(LastWill {
                topic: topic.clone(),
                payload: self
                    .will_payload
                    .clone()
                    .unwrap_or_default()
                    .into_bytes(),
                qos: QoS::try_from(self.will_qos).map_err(config_error)?,
                retain: self.will_retain,
            }),
            None => None,
        };

        Ok(ConnectionOptions {
            host: self.host.clone(),
            port: self.port,
            client_id: self.client_id.clone().unwrap_or_else(generate_client_id),
            username: self.username.clone(),
            password: self.password.clone(),
            ssl: self.ssl,
            cert_file: self.cert_file.clone(),
            key_file: self.key_file.clone(),
            ca_file: self.ca_file.clone(),
            version: self.version.clone(),
            clean_session: self.clean_session,
            keep_alive: Duration::from_secs(self.keep_alive),
            last_will,
            ack_timeout: Duration::from_secs(self.ack_timeout),
        })
    }

    /// Build the publish settings.
    pub fn driver_config(&self) -> OutboxResult<DriverConfig> {
        self.validate()?;
        Ok(DriverConfig {
            topic: TopicTemplate::parse(self.topic.clone()),
            retain: self.retain,
            qos: QoS::try_from(self.qos).map_err(config_error)?,
            retry_interval: Duration::from_secs(self.connect_retry_interval),
            max_retries: self.max_retries,
        })
    }
}

fn config_error(message: impl Into<String>) -> OutboxError {
    OutboxError::Config(message.into())
}
