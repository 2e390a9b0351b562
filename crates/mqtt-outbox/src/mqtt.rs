//! Broker transport backed by rumqttc.
//!
//! rumqttc splits a connection into an `AsyncClient` that queues requests and
//! an `EventLoop` that does the network I/O. After CONNACK the event loop is
//! moved into a poller task that runs for the life of the [`MqttSession`], so
//! keep-alive pings go out while the session sits idle. The poller forwards
//! publish progress and the first connection error over a channel; each
//! publish returns only once the broker has acknowledged it at the requested
//! QoS.

use crate::error::{TransportError, TransportResult};
use crate::options::{ConnectionOptions, QoS};
use crate::transport::{Connector, Session};
use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet,
    TlsConfiguration, Transport,
};
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, trace};

/// Requests buffered between the client handle and the event loop.
const DEFAULT_REQUEST_CAPACITY: usize = 16;

/// How long `disconnect` waits for the DISCONNECT packet to go out.
const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

/// Opens [`MqttSession`]s.
#[derive(Debug, Clone)]
pub struct MqttConnector {
    request_capacity: usize,
}

impl MqttConnector {
    pub fn new() -> Self {
        Self {
            request_capacity: DEFAULT_REQUEST_CAPACITY,
        }
    }
}

impl Default for MqttConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for MqttConnector {
    type Session = MqttSession;

    async fn connect(&self, options: &ConnectionOptions) -> TransportResult<MqttSession> {
        let transport = load_transport(options).await?;
        let mqtt_options = build_mqtt_options(options, transport);
        let (client, mut eventloop) = AsyncClient::new(mqtt_options, self.request_capacity);

        timeout(options.ack_timeout, wait_for_connack(&mut eventloop))
            .await
            .map_err(|_| TransportError::Timeout(options.ack_timeout))??;

        let (progress, poller) = spawn_poller(eventloop);
        Ok(MqttSession {
            client,
            progress,
            poller,
            ack_timeout: options.ack_timeout,
        })
    }
}

/// Event loop activity the session waits on.
#[derive(Debug)]
enum Progress {
    /// A PUBLISH packet with this id was written to the socket.
    Written(u16),
    PubAck(u16),
    PubComp(u16),
    Disconnected,
    /// The connection failed; the poller has stopped.
    Failed(String),
}

/// Poll the event loop until the connection fails or is closed.
fn spawn_poller(
    mut eventloop: EventLoop,
) -> (mpsc::UnboundedReceiver<Progress>, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let poller = tokio::spawn(async move {
        loop {
            let progress = match eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Publish(pkid))) => Progress::Written(pkid),
                Ok(Event::Incoming(Packet::PubAck(ack))) => Progress::PubAck(ack.pkid),
                Ok(Event::Incoming(Packet::PubComp(comp))) => Progress::PubComp(comp.pkid),
                Ok(Event::Outgoing(Outgoing::Disconnect)) => Progress::Disconnected,
                Ok(event) => {
                    trace!(?event, "MQTT event");
                    continue;
                }
                Err(e) => {
                    debug!(error = %e, "MQTT event loop stopped");
                    let _ = tx.send(Progress::Failed(e.to_string()));
                    break;
                }
            };
            let done = matches!(progress, Progress::Disconnected);
            if tx.send(progress).is_err() || done {
                break;
            }
        }
    });
    (rx, poller)
}

/// A connected rumqttc client.
///
/// Dropping the session stops its poller, which closes the socket.
pub struct MqttSession {
    client: AsyncClient,
    progress: mpsc::UnboundedReceiver<Progress>,
    poller: JoinHandle<()>,
    ack_timeout: Duration,
}

impl MqttSession {
    /// Discard progress left over from earlier publishes. Fails if the
    /// connection dropped since.
    fn clear_progress(&mut self) -> TransportResult<()> {
        loop {
            match self.progress.try_recv() {
                Ok(Progress::Failed(e)) => return Err(TransportError::Publish(e)),
                Ok(_) => {}
                Err(TryRecvError::Empty) => return Ok(()),
                Err(TryRecvError::Disconnected) => {
                    return Err(TransportError::Publish("event loop stopped".to_string()))
                }
            }
        }
    }
}

impl Drop for MqttSession {
    fn drop(&mut self) {
        self.poller.abort();
    }
}

#[async_trait]
impl Session for MqttSession {
    async fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        retain: bool,
        qos: QoS,
    ) -> TransportResult<()> {
        self.clear_progress()?;
        self.client
            .publish(topic, to_rumqttc_qos(qos), retain, payload.to_vec())
            .await
            .map_err(|e| TransportError::Publish(e.to_string()))?;

        let ack_timeout = self.ack_timeout;
        timeout(ack_timeout, wait_for_ack(&mut self.progress, qos))
            .await
            .map_err(|_| TransportError::Timeout(ack_timeout))?
    }

    async fn disconnect(&mut self) {
        if let Err(e) = self.client.disconnect().await {
            debug!(error = %e, "Disconnect request failed");
            return;
        }
        let _ = timeout(DISCONNECT_GRACE, async {
            while let Some(progress) = self.progress.recv().await {
                if matches!(progress, Progress::Disconnected | Progress::Failed(_)) {
                    break;
                }
            }
        })
        .await;
        self.poller.abort();
    }

    fn is_connected(&self) -> bool {
        !self.poller.is_finished()
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> TransportResult<()> {
    loop {
        let event = eventloop
            .poll()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        trace!(?event, "MQTT event");
        if let Event::Incoming(Packet::ConnAck(connack)) = event {
            return match connack.code {
                ConnectReturnCode::Success => Ok(()),
                code => Err(TransportError::Connect(format!(
                    "broker refused connection: {:?}",
                    code
                ))),
            };
        }
    }
}

/// Wait until the publish just queued is done: written to the socket for
/// QoS 0, PUBACK for QoS 1, PUBCOMP for QoS 2.
async fn wait_for_ack(
    progress: &mut mpsc::UnboundedReceiver<Progress>,
    qos: QoS,
) -> TransportResult<()> {
    let mut pkid = None;
    loop {
        match progress.recv().await {
            Some(Progress::Written(id)) => {
                if qos == QoS::AtMostOnce {
                    return Ok(());
                }
                pkid = Some(id);
            }
            Some(Progress::PubAck(id)) if qos == QoS::AtLeastOnce && pkid == Some(id) => {
                return Ok(());
            }
            Some(Progress::PubComp(id)) if qos == QoS::ExactlyOnce && pkid == Some(id) => {
                return Ok(());
            }
            Some(Progress::Failed(e)) => return Err(TransportError::Publish(e)),
            Some(_) => {}
            None => return Err(TransportError::Publish("event loop stopped".to_string())),
        }
    }
}

fn to_rumqttc_qos(qos: QoS) -> rumqttc::QoS {
    match qos {
        QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
        QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
    }
}

/// TLS transport for the options, reading certificate files from disk.
/// Returns `None` for plain TCP.
async fn load_transport(options: &ConnectionOptions) -> TransportResult<Option<Transport>> {
    if !options.ssl {
        return Ok(None);
    }

    let client_auth = match (&options.cert_file, &options.key_file) {
        (Some(cert), Some(key)) => Some((read_pem(cert).await?, read_pem(key).await?)),
        (None, None) => None,
        _ => {
            return Err(TransportError::Tls(
                "cert_file and key_file must be given together".to_string(),
            ))
        }
    };

    match &options.ca_file {
        Some(ca_file) => {
            let ca = read_pem(ca_file).await?;
            Ok(Some(Transport::tls_with_config(TlsConfiguration::Simple {
                ca,
                alpn: None,
                client_auth,
            })))
        }
        None if client_auth.is_some() => Err(TransportError::Tls(
            "client certificates require ca_file".to_string(),
        )),
        None => Ok(Some(Transport::tls_with_default_config())),
    }
}

async fn read_pem(path: &Path) -> TransportResult<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .map_err(|e| TransportError::Tls(format!("failed to read {}: {}", path.display(), e)))
}

fn build_mqtt_options(options: &ConnectionOptions, transport: Option<Transport>) -> MqttOptions {
    let mut mqtt_options = MqttOptions::new(
        options.client_id.clone(),
        options.host.clone(),
        options.effective_port(),
    );
    mqtt_options
        .set_keep_alive(options.keep_alive)
        .set_clean_session(options.clean_session);

    if let Some(username) = &options.username {
        mqtt_options.set_credentials(
            username.clone(),
            options.password.clone().unwrap_or_default(),
        );
    }

    if let Some(will) = &options.last_will {
        mqtt_options.set_last_will(rumqttc::LastWill::new(
            will.topic.clone(),
            will.payload.clone(),
            to_rumqttc_qos(will.qos),
            will.retain,
        ));
    }

    if let Some(transport) = transport {
        mqtt_options.set_transport(transport);
    }

    mqtt_options
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::LastWill;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::tempdir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    /// Read one MQTT packet: fixed header byte and body.
    async fn read_packet(stream: &mut TcpStream) -> Option<(u8, Vec<u8>)> {
        let header = stream.read_u8().await.ok()?;
        let mut len = 0usize;
        let mut shift = 0;
        loop {
            let byte = stream.read_u8().await.ok()?;
            len |= ((byte & 0x7f) as usize) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        let mut body = vec![0; len];
        stream.read_exact(&mut body).await.ok()?;
        Some((header, body))
    }

    /// Single-client broker on a loopback port. Accepts the CONNECT, answers
    /// PINGREQ and counts the pings. With `hang_up` it closes the socket
    /// right after CONNACK.
    async fn loopback_broker(hang_up: bool) -> (u16, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let pings = Arc::new(AtomicUsize::new(0));
        let seen = pings.clone();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            while let Some((header, _)) = read_packet(&mut stream).await {
                match header >> 4 {
                    // CONNECT
                    1 => {
                        stream.write_all(&[0x20, 0x02, 0x00, 0x00]).await.unwrap();
                        if hang_up {
                            break;
                        }
                    }
                    // PINGREQ
                    12 => {
                        seen.fetch_add(1, Ordering::SeqCst);
                        stream.write_all(&[0xD0, 0x00]).await.unwrap();
                    }
                    _ => {}
                }
            }
        });

        (port, pings)
    }

    fn loopback_options(port: u16) -> ConnectionOptions {
        let mut options = ConnectionOptions::new("127.0.0.1");
        options.port = Some(port);
        options.keep_alive = Duration::from_secs(5);
        options.ack_timeout = Duration::from_secs(5);
        options
    }

    #[test]
    fn test_build_options_plain() {
        let mut options = ConnectionOptions::new("broker.local");
        options.client_id = "outbox-test".to_string();
        options.clean_session = false;
        options.keep_alive = Duration::from_secs(20);

        let mqtt_options = build_mqtt_options(&options, None);

        assert_eq!(
            mqtt_options.broker_address(),
            ("broker.local".to_string(), 1883)
        );
        assert_eq!(mqtt_options.client_id(), "outbox-test");
        assert_eq!(mqtt_options.keep_alive(), Duration::from_secs(20));
        assert!(!mqtt_options.clean_session());
    }

    #[test]
    fn test_build_options_with_will_and_credentials() {
        let mut options = ConnectionOptions::new("broker.local");
        options.port = Some(1884);
        options.username = Some("user".to_string());
        options.last_will = Some(LastWill {
            topic: "status".to_string(),
            payload: b"offline".to_vec(),
            qos: QoS::AtLeastOnce,
            retain: true,
        });

        let mqtt_options = build_mqtt_options(&options, None);

        assert_eq!(mqtt_options.broker_address().1, 1884);
        assert!(mqtt_options.last_will().is_some());
    }

    #[test]
    fn test_qos_mapping() {
        assert_eq!(to_rumqttc_qos(QoS::AtMostOnce), rumqttc::QoS::AtMostOnce);
        assert_eq!(to_rumqttc_qos(QoS::AtLeastOnce), rumqttc::QoS::AtLeastOnce);
        assert_eq!(to_rumqttc_qos(QoS::ExactlyOnce), rumqttc::QoS::ExactlyOnce);
    }

    #[tokio::test]
    async fn test_plain_connection_has_no_tls_transport() {
        let options = ConnectionOptions::new("broker.local");
        assert!(load_transport(&options).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_tls_with_ca_and_client_cert() {
        let dir = tempdir().unwrap();
        let ca = dir.path().join("root-CA.crt");
        let cert = dir.path().join("certificate.pem.crt");
        let key = dir.path().join("private.pem.key");
        std::fs::write(&ca, b"ca").unwrap();
        std::fs::write(&cert, b"cert").unwrap();
        std::fs::write(&key, b"key").unwrap();

        let mut options = ConnectionOptions::new("broker.local");
        options.ssl = true;
        options.ca_file = Some(ca);
        options.cert_file = Some(cert);
        options.key_file = Some(key);

        match load_transport(&options).await.unwrap() {
            Some(Transport::Tls(TlsConfiguration::Simple {
                ca, client_auth, ..
            })) => {
                assert_eq!(ca, b"ca".to_vec());
                assert_eq!(client_auth, Some((b"cert".to_vec(), b"key".to_vec())));
            }
            _ => panic!("expected simple TLS configuration"),
        }
    }

    #[tokio::test]
    async fn test_missing_certificate_file_is_tls_error() {
        let dir = tempdir().unwrap();
        let mut options = ConnectionOptions::new("broker.local");
        options.ssl = true;
        options.ca_file = Some(dir.path().join("missing.crt"));

        let Err(err) = load_transport(&options).await else {
            panic!("expected a TLS error for a missing CA file");
        };
        assert!(matches!(err, TransportError::Tls(_)));
    }

    #[tokio::test]
    async fn test_client_cert_without_ca_is_rejected() {
        let dir = tempdir().unwrap();
        let cert = dir.path().join("c.pem");
        let key = dir.path().join("k.pem");
        std::fs::write(&cert, b"cert").unwrap();
        std::fs::write(&key, b"key").unwrap();

        let mut options = ConnectionOptions::new("broker.local");
        options.ssl = true;
        options.cert_file = Some(cert);
        options.key_file = Some(key);

        assert!(matches!(
            load_transport(&options).await,
            Err(TransportError::Tls(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_to_closed_port_fails() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut options = ConnectionOptions::new("127.0.0.1");
        options.port = Some(port);
        options.ack_timeout = Duration::from_secs(5);

        let result = MqttConnector::new().connect(&options).await;
        assert!(matches!(
            result,
            Err(TransportError::Connect(_)) | Err(TransportError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn test_idle_session_keeps_pinging() {
        let (port, pings) = loopback_broker(false).await;
        let mut session = MqttConnector::new()
            .connect(&loopback_options(port))
            .await
            .unwrap();

        session
            .publish("hello", b"x", false, QoS::AtMostOnce)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(11)).await;

        assert!(pings.load(Ordering::SeqCst) >= 1);
        assert!(session.is_connected());
        session
            .publish("hello", b"y", false, QoS::AtMostOnce)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_broker_hang_up_is_noticed_while_idle() {
        let (port, _) = loopback_broker(true).await;
        let mut session = MqttConnector::new()
            .connect(&loopback_options(port))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(500)).await;

        assert!(!session.is_connected());
        assert!(matches!(
            session.publish("hello", b"x", false, QoS::AtMostOnce).await,
            Err(TransportError::Publish(_))
        ));
    }
}
