//! Ingest entry points.

use crate::codec::Encoder;
use crate::config::OutboxConfig;
use crate::connection::ConnectionHolder;
use crate::driver::{DrainOutcome, PublishDriver};
use crate::error::OutboxResult;
use crate::event::Event;
use crate::queue::{EventQueue, PendingItem};
use crate::transport::Connector;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Buffers encoded events and publishes them through one broker session.
///
/// Every ingest call drains the queue before returning, so the caller's task
/// does the publishing and waits out any backoff. Ingest takes `&mut self`:
/// concurrent producers must funnel events to the single owner, e.g. over an
/// mpsc channel.
///
/// Transport failures are never returned. The only errors are encoding
/// failures and a bounded queue that is still full after draining.
pub struct EventPublisher<C: Connector> {
    encoder: Box<dyn Encoder>,
    queue: EventQueue,
    driver: PublishDriver<C>,
}

impl<C: Connector> EventPublisher<C> {
    pub fn new(encoder: Box<dyn Encoder>, queue: EventQueue, driver: PublishDriver<C>) -> Self {
        Self {
            encoder,
            queue,
            driver,
        }
    }

    /// Wire up a publisher from validated configuration.
    pub fn from_config(
        config: &OutboxConfig,
        connector: C,
        shutdown: CancellationToken,
    ) -> OutboxResult<Self> {
        let options = config.connection_options()?;
        let connection = ConnectionHolder::new(connector, options);
        let driver = PublishDriver::new(config.driver_config()?, connection, shutdown);
        Ok(Self::new(
            config.codec.build(),
            EventQueue::with_capacity_limit(config.max_pending),
            driver,
        ))
    }

    /// Encode and enqueue one event, then drain the queue.
    pub async fn receive_one(&mut self, event: Event) -> OutboxResult<DrainOutcome> {
        self.ingest(vec![event]).await
    }

    /// Encode and enqueue every event in order, then drain the queue once.
    ///
    /// Nothing from the batch is enqueued if any event fails to encode or the
    /// batch does not fit a bounded queue. In both cases the existing backlog
    /// is drained before the error is returned.
    pub async fn receive_batch(&mut self, events: Vec<Event>) -> OutboxResult<DrainOutcome> {
        debug!(count = events.len(), "Enqueuing batch");
        self.ingest(events).await
    }

    async fn ingest(&mut self, events: Vec<Event>) -> OutboxResult<DrainOutcome> {
        let items = match self.encode_all(events) {
            Ok(items) => items,
            Err(e) => {
                warn!(
                    error = %e,
                    pending = self.queue.len(),
                    "Rejecting events that failed to encode"
                );
                self.drain_backlog().await;
                return Err(e);
            }
        };

        if self.queue.ensure_room(items.len()).is_err() {
            self.drain_backlog().await;
            if let Err(e) = self.queue.ensure_room(items.len()) {
                warn!(error = %e, "Rejecting events, queue still full after draining");
                return Err(e);
            }
        }

        for item in items {
            self.queue.push(item)?;
        }
        Ok(self.driver.drain(&mut self.queue).await)
    }

    fn encode_all(&self, events: Vec<Event>) -> OutboxResult<Vec<PendingItem>> {
        events
            .into_iter()
            .map(|event| -> OutboxResult<PendingItem> {
                let payload = self.encoder.encode(&event)?;
                Ok(PendingItem::new(event, payload))
            })
            .collect()
    }

    /// Give queued events a chance to go out before the call is rejected.
    async fn drain_backlog(&mut self) {
        if self.queue.is_empty() {
            return;
        }
        let outcome = self.driver.drain(&mut self.queue).await;
        debug!(?outcome, "Backlog drain before rejecting");
    }

    /// Signal shutdown: any backoff in progress ends and the drain returns.
    /// Queued events are left in place.
    pub fn shutdown(&self) {
        info!(pending = self.queue.len(), "Shutdown signalled");
        self.driver.shutdown_token().cancel();
    }

    /// A clone of the shutdown token, for signalling from another task while
    /// an ingest call is in progress.
    pub fn shutdown_handle(&self) -> CancellationToken {
        self.driver.shutdown_token().clone()
    }

    /// Disconnect from the broker. Queued events are not flushed.
    pub async fn close(&mut self) {
        if !self.queue.is_empty() {
            warn!(
                pending = self.queue.len(),
                "Closing with undelivered events; they are lost with this process"
            );
        }
        self.driver.close().await;
    }

    /// Number of events waiting for delivery.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn queue(&self) -> &EventQueue {
        &self.queue
    }

    pub fn driver(&self) -> &PublishDriver<C> {
        &self.driver
    }
}
