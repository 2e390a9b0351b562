//! Publish driver: drains the queue through the broker session with retry.
//!
//! # Delivery guarantee
//!
//! The head item is popped only after the broker accepted it. Any transport
//! failure (connect or publish) drops the session, waits the fixed retry
//! interval, and retries the same item. Retries are unbounded unless
//! `max_retries` is set, so an outage shows up as latency and log lines,
//! never as a lost event.
//!
//! ```text
//!   Idle ──drain()──▶ Draining ──publish ok, queue empty──▶ Idle
//!                      │    ▲
//!              failure │    │ interval elapsed
//!                      ▼    │
//!                     Backoff ──shutdown──▶ return (item stays queued)
//! ```

use crate::connection::ConnectionHolder;
use crate::error::TransportResult;
use crate::options::QoS;
use crate::queue::EventQueue;
use crate::template::TopicTemplate;
use crate::transport::{Connector, Session};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Publish settings applied to every item.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Topic template rendered against each item's own event.
    pub topic: TopicTemplate,
    pub retain: bool,
    pub qos: QoS,
    /// Fixed wait between a failed attempt and the retry.
    pub retry_interval: Duration,
    /// Consecutive retries of one item before the drain call gives up.
    /// `None` retries forever.
    pub max_retries: Option<u32>,
}

impl DriverConfig {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: TopicTemplate::parse(topic),
            retain: false,
            qos: QoS::AtMostOnce,
            retry_interval: Duration::from_secs(10),
            max_retries: None,
        }
    }
}

/// How a drain call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// The queue is empty.
    Drained { published: usize },
    /// Shutdown fired during backoff; the failed item is still at the head.
    Interrupted { published: usize, pending: usize },
    /// `max_retries` was reached for the head item, which is still queued.
    RetriesExhausted { published: usize, pending: usize },
}

impl DrainOutcome {
    /// Number of items delivered during this drain call.
    pub fn published(&self) -> usize {
        match *self {
            DrainOutcome::Drained { published }
            | DrainOutcome::Interrupted { published, .. }
            | DrainOutcome::RetriesExhausted { published, .. } => published,
        }
    }

    pub fn is_drained(&self) -> bool {
        matches!(self, DrainOutcome::Drained { .. })
    }
}

/// Drains an [`EventQueue`] through a [`ConnectionHolder`].
pub struct PublishDriver<C: Connector> {
    config: DriverConfig,
    connection: ConnectionHolder<C>,
    shutdown: CancellationToken,
}

impl<C: Connector> PublishDriver<C> {
    pub fn new(
        config: DriverConfig,
        connection: ConnectionHolder<C>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            connection,
            shutdown,
        }
    }

    /// Publish queued items in FIFO order until the queue is empty, shutdown
    /// interrupts a backoff, or `max_retries` is reached.
    ///
    /// Draining an empty queue does nothing, not even connect.
    pub async fn drain(&mut self, queue: &mut EventQueue) -> DrainOutcome {
        let mut published = 0;
        let mut failures: u32 = 0;

        while let Some(item) = queue.peek_first() {
            let topic = self.config.topic.render(&item.event);
            debug!(
                topic = %topic,
                retain = self.config.retain,
                qos = %self.config.qos,
                payload_len = item.payload.len(),
                "Publishing event"
            );

            let error = match self.try_publish(&topic, &item.payload).await {
                Ok(()) => {
                    queue.pop_first();
                    published += 1;
                    failures = 0;
                    debug!(topic = %topic, pending = queue.len(), "Event published");
                    continue;
                }
                Err(e) => e,
            };

            self.connection.invalidate();
            failures += 1;

            if let Some(max_retries) = self.config.max_retries {
                if failures > max_retries {
                    error!(
                        topic = %topic,
                        attempts = failures,
                        pending = queue.len(),
                        error = %error,
                        "Giving up on this drain, event stays queued"
                    );
                    return DrainOutcome::RetriesExhausted {
                        published,
                        pending: queue.len(),
                    };
                }
            }

            warn!(
                topic = %topic,
                attempt = failures,
                retry_in_secs = self.config.retry_interval.as_secs_f64(),
                error = %error,
                "Error while publishing to MQTT server, will retry"
            );

            if !backoff(&self.shutdown, self.config.retry_interval).await {
                info!(
                    pending = queue.len(),
                    "Shutdown requested during backoff, leaving events queued"
                );
                return DrainOutcome::Interrupted {
                    published,
                    pending: queue.len(),
                };
            }
        }

        if published > 0 {
            info!(published, "Queue drained");
        }
        DrainOutcome::Drained { published }
    }

    async fn try_publish(&mut self, topic: &str, payload: &[u8]) -> TransportResult<()> {
        let session = self.connection.get().await?;
        session
            .publish(topic, payload, self.config.retain, self.config.qos)
            .await
    }

    /// Disconnect the broker session, if one is open.
    pub async fn close(&mut self) {
        self.connection.close().await;
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn connection(&self) -> &ConnectionHolder<C> {
        &self.connection
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }
}

/// Wait out the retry interval. Returns false if shutdown cut it short.
async fn backoff(shutdown: &CancellationToken, interval: Duration) -> bool {
    tokio::select! {
        biased;
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(interval) => true,
    }
}
