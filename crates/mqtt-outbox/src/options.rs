//! Connection options handed to the transport.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Default broker port without TLS.
pub const DEFAULT_PORT: u16 = 1883;

/// Default broker port with TLS.
pub const DEFAULT_TLS_PORT: u16 = 8883;

/// Delivery guarantee for a published message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum QoS {
    /// 0: at most once
    #[default]
    AtMostOnce,
    /// 1: at least once
    AtLeastOnce,
    /// 2: exactly once
    ExactlyOnce,
}

impl TryFrom<u8> for QoS {
    type Error = String;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(format!("QoS must be 0, 1 or 2, got {}", other)),
        }
    }
}

impl From<QoS> for u8 {
    fn from(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
            QoS::ExactlyOnce => 2,
        }
    }
}

impl fmt::Display for QoS {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", u8::from(*self))
    }
}

/// Message the broker publishes on our behalf if we vanish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastWill {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

/// Everything needed to open a broker session.
///
/// Built once at startup and never changed afterwards.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionOptions {
    pub host: String,
    /// Explicit port; see [`ConnectionOptions::effective_port`].
    pub port: Option<u16>,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub ssl: bool,
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
    pub ca_file: Option<PathBuf>,
    /// Protocol version string, e.g. "3.1.1".
    pub version: String,
    pub clean_session: bool,
    pub keep_alive: Duration,
    pub last_will: Option<LastWill>,
    /// Upper bound on waiting for CONNACK and publish acknowledgements.
    pub ack_timeout: Duration,
}

impl ConnectionOptions {
    /// Options for a plain connection with defaults for everything else.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: None,
            client_id: generate_client_id(),
            username: None,
            password: None,
            ssl: false,
            cert_file: None,
            key_file: None,
            ca_file: None,
            version: "3.1.1".to_string(),
            clean_session: true,
            keep_alive: Duration::from_secs(15),
            last_will: None,
            ack_timeout: Duration::from_secs(30),
        }
    }

    /// The port to connect to: the configured one, else 8883 with TLS and
    /// 1883 without.
    pub fn effective_port(&self) -> u16 {
        self.port.unwrap_or(if self.ssl {
            DEFAULT_TLS_PORT
        } else {
            DEFAULT_PORT
        })
    }

    /// `host:port` for logs.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.effective_port())
    }
}

// Hand-written so the password never reaches a log line.
impl fmt::Debug for ConnectionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionOptions")
            .field("host", &self.host)
            .field("port", &self.effective_port())
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("ssl", &self.ssl)
            .field("cert_file", &self.cert_file)
            .field("key_file", &self.key_file)
            .field("ca_file", &self.ca_file)
            .field("version", &self.version)
            .field("clean_session", &self.clean_session)
            .field("keep_alive", &self.keep_alive)
            .field("will_topic", &self.last_will.as_ref().map(|w| &w.topic))
            .finish()
    }
}

/// Generate a client identifier short enough for any 3.1.1 broker (23 chars).
pub fn generate_client_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("outbox{}", &id[..16])
}
