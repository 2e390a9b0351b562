//! Shutdown during backoff.

use super::harness::{fast_config, message, publisher, MockBroker};
use crate::driver::{DrainOutcome, DriverConfig};
use std::time::Duration;
use tokio::time::timeout;

#[tokio::test]
async fn shutdown_interrupts_backoff_and_keeps_event() {
    let broker = MockBroker::new();
    broker.fail_all_publishes(true);
    let config = DriverConfig {
        retry_interval: Duration::from_secs(60),
        ..fast_config("hello")
    };
    let mut publisher = publisher(&broker, config);
    let shutdown = publisher.shutdown_handle();

    let task = tokio::spawn(async move {
        let outcome = publisher.receive_one(message("stuck")).await.unwrap();
        (outcome, publisher)
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown.cancel();

    let (outcome, publisher) = timeout(Duration::from_secs(5), task)
        .await
        .expect("drain did not return after shutdown")
        .unwrap();

    assert_eq!(
        outcome,
        DrainOutcome::Interrupted {
            published: 0,
            pending: 1
        }
    );
    assert_eq!(broker.publish_attempts(), 1);
    assert_eq!(
        publisher.queue().peek_first().unwrap().payload,
        br#"{"message":"stuck"}"#.to_vec()
    );
}

#[tokio::test]
async fn shutdown_before_failure_makes_no_further_attempts() {
    let broker = MockBroker::new();
    broker.fail_next_connects(1);
    let mut publisher = publisher(&broker, fast_config("hello"));

    publisher.shutdown();
    let outcome = publisher.receive_one(message("late")).await.unwrap();

    assert!(matches!(outcome, DrainOutcome::Interrupted { pending: 1, .. }));
    assert_eq!(broker.connect_attempts(), 1);
    assert_eq!(publisher.pending(), 1);
}

#[tokio::test]
async fn shutdown_does_not_stop_successful_publishing() {
    let broker = MockBroker::new();
    let mut publisher = publisher(&broker, fast_config("hello"));

    publisher.shutdown();
    let outcome = publisher
        .receive_batch(vec![message("a"), message("b")])
        .await
        .unwrap();

    assert_eq!(outcome, DrainOutcome::Drained { published: 2 });
}

#[tokio::test]
async fn in_flight_publish_completes_after_shutdown() {
    let broker = MockBroker::new();
    broker.set_publish_delay(Duration::from_millis(100));
    let mut publisher = publisher(&broker, fast_config("hello"));
    let shutdown = publisher.shutdown_handle();

    let task = tokio::spawn(async move { publisher.receive_one(message("slow")).await.unwrap() });

    tokio::time::sleep(Duration::from_millis(20)).await;
    shutdown.cancel();

    let outcome = task.await.unwrap();
    assert_eq!(outcome, DrainOutcome::Drained { published: 1 });
    assert_eq!(broker.published().len(), 1);
}
