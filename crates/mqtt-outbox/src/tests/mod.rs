//! Integration tests for the outbox publisher.
//!
//! - `harness.rs`    - Mock broker, transport and encoder helpers
//! - `delivery.rs`   - Single-event delivery and publish arguments
//! - `ordering.rs`   - FIFO order and per-event topic rendering
//! - `batching.rs`   - One drain and one connect per batch
//! - `retry.rs`      - Retry of the same event after transport failures
//! - `shutdown.rs`   - Shutdown during backoff
//! - `rejection.rs`  - Encoding failures and bounded queue

mod shutdown;
