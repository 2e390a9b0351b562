//! Transport seam between the publish driver and a broker client.
//!
//! The driver only ever sees these two traits, which keeps the retry logic
//! testable against an in-memory transport.

use crate::error::TransportResult;
use crate::options::{ConnectionOptions, QoS};
use async_trait::async_trait;

/// An established broker session.
#[async_trait]
pub trait Session: Send {
    /// Publish one message. Returns once the broker has taken it at the
    /// requested QoS.
    async fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        retain: bool,
        qos: QoS,
    ) -> TransportResult<()>;

    /// Close the session politely. Best effort.
    async fn disconnect(&mut self) {}

    /// False once the transport has noticed the connection is gone, e.g. the
    /// broker closed it while the session was idle.
    fn is_connected(&self) -> bool {
        true
    }
}

/// Opens broker sessions.
#[async_trait]
pub trait Connector: Send + Sync {
    type Session: Session;

    async fn connect(&self, options: &ConnectionOptions) -> TransportResult<Self::Session>;
}
