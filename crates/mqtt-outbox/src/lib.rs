//! mqtt-outbox: Buffered, at-least-once event publisher for MQTT brokers.
//!
//! Events are encoded into payloads, appended to an in-memory queue and
//! published in order through a single, lazily opened broker session. A
//! failed connect or publish drops the session, waits a fixed interval and
//! retries the same event.
//!
//! # Core Invariants
//!
//! 1. **Pop-After-Success**: An event leaves the queue only once the broker took it
//! 2. **FIFO**: Events are published in the order they were received
//! 3. **One Session**: At most one broker session exists at a time
//! 4. **Fresh Reconnect**: Any transport failure discards the session
//!
//! # Architecture
//!
//! ```text
//! receive_* -> Encoder -> EventQueue -> PublishDriver -> ConnectionHolder -> Broker
//!                             ^               |
//!                             |__ retry ______|
//! ```

pub mod codec;
pub mod config;
pub mod connection;
pub mod driver;
pub mod error;
pub mod event;
pub mod mqtt;
pub mod options;
pub mod publisher;
pub mod queue;
pub mod template;
pub mod transport;

#[cfg(test)]
mod tests;

pub use codec::{CodecConfig, Encoder, JsonEncoder, LineEncoder};
pub use config::OutboxConfig;
pub use connection::{ConnectionHolder, ConnectionState};
pub use driver::{DrainOutcome, DriverConfig, PublishDriver};
pub use error::{EncodeError, OutboxError, OutboxResult, TransportError, TransportResult};
pub use event::Event;
pub use mqtt::{MqttConnector, MqttSession};
pub use options::{ConnectionOptions, LastWill, QoS};
pub use publisher::EventPublisher;
pub use queue::{EventQueue, PendingItem};
pub use template::TopicTemplate;
pub use transport::{Connector, Session};
