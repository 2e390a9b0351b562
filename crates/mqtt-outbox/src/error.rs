//! Error types for the outbox.

use std::time::Duration;
use thiserror::Error;

/// Failure talking to the broker.
///
/// Never surfaced to ingest callers: the publish driver recovers from every
/// variant by dropping the session and retrying after the backoff interval.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Establishing the session failed
    #[error("Connect failed: {0}")]
    Connect(String),

    /// The publish call itself failed
    #[error("Publish failed: {0}")]
    Publish(String),

    /// The broker did not answer in time
    #[error("Timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// TLS material could not be loaded
    #[error("TLS error: {0}")]
    Tls(String),
}

/// Failure turning an event into payload bytes.
#[derive(Error, Debug)]
pub enum EncodeError {
    /// JSON serialization error
    #[error("JSON encoding failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Outbox error type.
#[derive(Error, Debug)]
pub enum OutboxError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error (config file, stdin)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error (config file)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Event encoding error
    #[error("Encoding error: {0}")]
    Encode(#[from] EncodeError),

    /// Bounded queue has no room for the ingested events
    #[error("Queue full: {pending} pending, {incoming} incoming, capacity {capacity}")]
    QueueFull {
        pending: usize,
        incoming: usize,
        capacity: usize,
    },
}

/// Result type alias using OutboxError.
pub type OutboxResult<T> = Result<T, OutboxError>;

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;
