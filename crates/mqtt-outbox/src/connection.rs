//! Lazy holder for the single broker session.

use crate::error::{TransportError, TransportResult};
use crate::options::ConnectionOptions;
use crate::transport::{Connector, Session};
use tracing::{debug, info};

/// Whether a session is currently established.
#[derive(Debug)]
pub enum ConnectionState<S> {
    Absent,
    Live(S),
}

impl<S> Default for ConnectionState<S> {
    fn default() -> Self {
        ConnectionState::Absent
    }
}

/// Owns the one broker session of the process.
///
/// The session is opened on first use and dropped on any failure, so the
/// next [`ConnectionHolder::get`] reconnects from scratch.
pub struct ConnectionHolder<C: Connector> {
    connector: C,
    options: ConnectionOptions,
    state: ConnectionState<C::Session>,
    connects: u64,
}

impl<C: Connector> ConnectionHolder<C> {
    pub fn new(connector: C, options: ConnectionOptions) -> Self {
        Self {
            connector,
            options,
            state: ConnectionState::Absent,
            connects: 0,
        }
    }

    /// Return the live session, connecting first if there is none.
    ///
    /// A session the transport reports as disconnected is dropped and
    /// replaced. A failed connect leaves the holder `Absent`.
    pub async fn get(&mut self) -> TransportResult<&mut C::Session> {
        if let ConnectionState::Live(session) = &self.state {
            if !session.is_connected() {
                info!(
                    broker = %self.options.address(),
                    "Broker session lost while idle, reconnecting"
                );
                self.state = ConnectionState::Absent;
            }
        }

        if let ConnectionState::Absent = self.state {
            debug!(options = ?self.options, "Connecting to broker");
            let session = self.connector.connect(&self.options).await?;
            self.connects += 1;
            info!(
                broker = %self.options.address(),
                client_id = %self.options.client_id,
                connects = self.connects,
                "Broker session established"
            );
            self.state = ConnectionState::Live(session);
        }

        match &mut self.state {
            ConnectionState::Live(session) => Ok(session),
            ConnectionState::Absent => Err(TransportError::Connect(
                "no session after connect".to_string(),
            )),
        }
    }

    /// Drop the current session, if any.
    pub fn invalidate(&mut self) {
        if let ConnectionState::Live(_) = std::mem::take(&mut self.state) {
            debug!(broker = %self.options.address(), "Broker session invalidated");
        }
    }

    /// Disconnect the current session, if any, and leave the holder `Absent`.
    pub async fn close(&mut self) {
        if let ConnectionState::Live(mut session) = std::mem::take(&mut self.state) {
            session.disconnect().await;
            info!(broker = %self.options.address(), "Broker session closed");
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self.state, ConnectionState::Live(_))
    }

    /// Number of sessions successfully established so far.
    pub fn connect_count(&self) -> u64 {
        self.connects
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }
}
