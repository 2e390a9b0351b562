//! mqtt-outbox binary entry point.
//!
//! Usage: mqtt-outbox --config <file> [--host <host>] [--topic <topic>]
//!
//! Reads newline-delimited events from stdin and publishes them to the
//! configured broker. Lines that are not JSON objects are wrapped as
//! `{"message": <line>}`.

use clap::Parser;
use mqtt_outbox::{
    DrainOutcome, Event, EventPublisher, MqttConnector, OutboxConfig, OutboxError, OutboxResult,
};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Events read from stdin but not yet handed to the publisher.
const INGEST_CHANNEL_CAPACITY: usize = 1024;

/// Upper bound on events handed to one batch call.
const MAX_BATCH: usize = 256;

/// mqtt-outbox: Buffered, retrying event publisher for MQTT brokers.
#[derive(Parser, Debug)]
#[command(name = "mqtt-outbox")]
#[command(about = "Publish newline-delimited events from stdin to an MQTT broker")]
struct Args {
    /// Path to the JSON configuration file.
    #[arg(long, env = "MQTT_OUTBOX_CONFIG")]
    config: Option<PathBuf>,

    /// Broker host, overrides the configuration file.
    #[arg(long, env = "MQTT_OUTBOX_HOST")]
    host: Option<String>,

    /// Broker port, overrides the configuration file.
    #[arg(long, env = "MQTT_OUTBOX_PORT")]
    port: Option<u16>,

    /// Topic template, overrides the configuration file.
    #[arg(long, env = "MQTT_OUTBOX_TOPIC")]
    topic: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Also write JSONL logs to this file.
    #[arg(long, env = "MQTT_OUTBOX_LOG_FILE")]
    log_file: Option<PathBuf>,
}

fn load_config(args: &Args) -> OutboxResult<OutboxConfig> {
    let mut config = match &args.config {
        Some(path) => OutboxConfig::load_from_file(path)?,
        None => {
            let host = args.host.clone().ok_or_else(|| {
                OutboxError::Config("No configuration file given; use --config or --host".into())
            })?;
            let topic = args.topic.clone().ok_or_else(|| {
                OutboxError::Config("No configuration file given; use --config or --topic".into())
            })?;
            OutboxConfig::new(host, topic)
        }
    };

    config.load_from_env();

    // Override with CLI args if provided
    if let Some(host) = &args.host {
        config.host = host.clone();
    }
    if let Some(port) = args.port {
        config.port = Some(port);
    }
    if let Some(topic) = &args.topic {
        config.topic = topic.clone();
    }
    if let Some(log_level) = &args.log_level {
        config.log_level = log_level.clone();
    }

    config.validate()?;
    Ok(config)
}

/// Forward stdin lines as events until EOF or shutdown.
async fn read_stdin(tx: mpsc::Sender<Event>, shutdown: CancellationToken) -> OutboxResult<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            debug!("End of input");
            break;
        };
        if line.trim().is_empty() {
            continue;
        }
        if tx.send(Event::from_line(&line)).await.is_err() {
            break;
        }
    }
    Ok(())
}

/// Hand queued events to the publisher, batching whatever is already waiting.
async fn publish_events(
    publisher: &mut EventPublisher<MqttConnector>,
    mut rx: mpsc::Receiver<Event>,
) {
    while let Some(first) = rx.recv().await {
        let mut batch = vec![first];
        while batch.len() < MAX_BATCH {
            match rx.try_recv() {
                Ok(event) => batch.push(event),
                Err(_) => break,
            }
        }

        let result = if batch.len() == 1 {
            publisher.receive_one(batch.remove(0)).await
        } else {
            publisher.receive_batch(batch).await
        };

        match result {
            Ok(DrainOutcome::Interrupted { pending, .. }) => {
                info!(pending, "Publishing interrupted by shutdown");
                break;
            }
            Ok(outcome) => debug!(?outcome, "Drain finished"),
            Err(e) => warn!(error = %e, "Dropping events that could not be enqueued"),
        }
    }
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[tokio::main]
async fn main() -> OutboxResult<()> {
    let args = Args::parse();

    let config = load_config(&args);
    let default_level = match &config {
        Ok(config) => config.log_level.clone(),
        Err(_) => "info".to_string(),
    };

    // Initialize logging via observability crate
    observability::init_with_config(observability::LogConfig {
        service_name: "mqtt-outbox".into(),
        default_level,
        log_path: args.log_file.clone(),
        also_stderr: true,
    })?;

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            return Err(e);
        }
    };

    info!(
        host = %config.host,
        port = ?config.port,
        topic = %config.topic,
        qos = config.qos,
        retain = config.retain,
        ssl = config.ssl,
        retry_interval_secs = config.connect_retry_interval,
        max_pending = ?config.max_pending,
        "Configuration loaded"
    );

    let shutdown = CancellationToken::new();
    let mut publisher =
        EventPublisher::from_config(&config, MqttConnector::new(), shutdown.clone())?;

    let signals = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            wait_for_signal().await;
            info!("Received shutdown signal, exiting...");
            shutdown.cancel();
        }
    });

    let (tx, rx) = mpsc::channel(INGEST_CHANNEL_CAPACITY);
    let reader = tokio::spawn(read_stdin(tx, shutdown.clone()));
    let consumer = tokio::spawn(async move {
        publish_events(&mut publisher, rx).await;
        publisher
    });

    match reader.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "Reading input failed"),
        Err(e) => error!(error = %e, "Input task panicked"),
    }

    // Remaining events are still published; a signal interrupts any retry.
    match consumer.await {
        Ok(mut publisher) => publisher.close().await,
        Err(e) => error!(error = %e, "Publisher task panicked"),
    }
    signals.abort();

    info!("mqtt-outbox stopped");
    Ok(())
}
