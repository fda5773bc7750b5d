//! SmartLink broker client.
//!
//! The broker arbitrates WAN sessions: the client registers with a bearer
//! token, receives the account's radio inventory as unsolicited `radio
//! list` lines, and asks for a connection to one radio. The broker answers
//! with `radio connect_ready handle=<hex>` carrying the one-time nonce the
//! radio will accept via `wan validate`.
//!
//! The wire format is the same line-framed ASCII scheme as the control
//! channel, with a distinct vocabulary. The broker is stateless once the
//! handle is delivered; WAN streaming runs against the radio directly.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::discovery::{DiscoveredRadio, RadioSource};
use crate::protocol::{frame_command, parse_line, Line, Reply};
use crate::protocol_constants::{BROKER_HOST, BROKER_PORT};
use crate::tls;

/// How long to wait for the broker to acknowledge registration before
/// proceeding optimistically. The vendor service predates reliable
/// replies.
const REGISTER_REPLY_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors raised by the broker client.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Socket-level failure.
    #[error("broker transport error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS handshake failure.
    #[error("broker TLS error: {0}")]
    Tls(String),

    /// The broker rejected our registration (bad or expired token).
    #[error("broker rejected registration: {0}")]
    RegisterRejected(String),

    /// The bearer token expired mid-session.
    #[error("bearer token expired")]
    TokenExpired,

    /// The broker session has ended.
    #[error("broker session closed")]
    Closed,
}

/// Convenient Result alias for broker operations.
pub type BrokerResult<T> = Result<T, BrokerError>;

/// Notifications from the broker session.
#[derive(Debug, Clone)]
pub enum BrokerEvent {
    /// A WAN radio from the account inventory.
    RadioListed(DiscoveredRadio),
    /// The broker authorized a WAN session; present `handle` to the radio
    /// via `wan validate`.
    ConnectReady {
        /// One-time nonce for the control channel.
        handle: String,
        /// Serial the handle authorizes, when the broker includes it.
        serial: Option<String>,
    },
    /// The broker session ended.
    Closed,
}

/// A live session to the SmartLink broker.
pub struct BrokerClient {
    writer_tx: mpsc::UnboundedSender<String>,
    next_seq: AtomicU32,
    pending: Arc<Mutex<HashMap<u32, oneshot::Sender<Reply>>>>,
    cancel: CancellationToken,
}

impl BrokerClient {
    /// Connects to the vendor broker, registers, and starts listening.
    ///
    /// `token` is the OAuth bearer; it is redacted from logs. Inventory
    /// and connect-ready notifications arrive on `events`.
    pub async fn connect(
        app_name: &str,
        token: &str,
        events: mpsc::UnboundedSender<BrokerEvent>,
    ) -> BrokerResult<Arc<Self>> {
        log::info!("[Broker] connecting to {}:{}", BROKER_HOST, BROKER_PORT);
        let stream = tls::connect_tls(BROKER_HOST, BROKER_PORT)
            .await
            .map_err(|e| BrokerError::Tls(e.to_string()))?;
        Self::from_stream(stream, app_name, token, events).await
    }

    /// Builds a session over an established stream and registers.
    ///
    /// Separated from [`BrokerClient::connect`] so tests can drive the
    /// protocol over a local socket pair.
    async fn from_stream<S>(
        stream: S,
        app_name: &str,
        token: &str,
        events: mpsc::UnboundedSender<BrokerEvent>,
    ) -> BrokerResult<Arc<Self>>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (read_half, mut write_half) = tokio::io::split(stream);
        let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<String>();
        let cancel = CancellationToken::new();

        let client = Arc::new(Self {
            writer_tx,
            next_seq: AtomicU32::new(1),
            pending: Arc::new(Mutex::new(HashMap::new())),
            cancel: cancel.clone(),
        });

        // Writer task.
        let writer_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = writer_cancel.cancelled() => break,
                    frame = writer_rx.recv() => match frame {
                        Some(frame) => {
                            if let Err(e) = write_half.write_all(frame.as_bytes()).await {
                                log::warn!("[Broker] write error: {}", e);
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        });

        // Reader task.
        let reader_pending = Arc::clone(&client.pending);
        let reader_events = events.clone();
        let reader_cancel = cancel.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(read_half).lines();
            loop {
                tokio::select! {
                    _ = reader_cancel.cancelled() => break,
                    line = lines.next_line() => match line {
                        Ok(Some(line)) => {
                            handle_broker_line(&line, &reader_pending, &reader_events);
                        }
                        Ok(None) => {
                            log::info!("[Broker] peer closed the session");
                            let _ = reader_events.send(BrokerEvent::Closed);
                            break;
                        }
                        Err(e) => {
                            log::warn!("[Broker] read error: {}", e);
                            let _ = reader_events.send(BrokerEvent::Closed);
                            break;
                        }
                    }
                }
            }
        });

        // Register on TLS-ready. The token never reaches the logs.
        log::debug!("[Broker] registering application {}", app_name);
        let register = format!(
            "application register name={} platform={} token={}",
            app_name,
            std::env::consts::OS,
            token
        );
        let reply_rx = client.submit(&register);
        match tokio::time::timeout(REGISTER_REPLY_TIMEOUT, reply_rx).await {
            Ok(Ok(reply)) if reply.is_failure() => {
                client.shutdown();
                return Err(BrokerError::RegisterRejected(reply.message));
            }
            Ok(Ok(_)) => {}
            Ok(Err(_)) => {
                client.shutdown();
                return Err(BrokerError::Closed);
            }
            // No acknowledgment is not a rejection; older broker builds
            // only start streaming the radio list.
            Err(_) => log::debug!("[Broker] no register acknowledgment, proceeding"),
        }

        Ok(client)
    }

    /// Asks the broker to authorize a WAN session with the given radio.
    ///
    /// The answer arrives as [`BrokerEvent::ConnectReady`].
    pub fn request_wan_connect(&self, serial: &str) {
        let body = format!("application connect serial={} hole_punch_port=0", serial);
        log::info!("[Broker] requesting WAN connect for {}", serial);
        let _ = self.submit(&body);
    }

    /// Ends the broker session.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        self.pending.lock().clear();
    }

    fn submit(&self, body: &str) -> oneshot::Receiver<Reply> {
        let (tx, rx) = oneshot::channel();
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.pending.lock().insert(seq, tx);
        if self.writer_tx.send(frame_command(seq, body)).is_err() {
            self.pending.lock().remove(&seq);
        }
        rx
    }
}

impl Drop for BrokerClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn handle_broker_line(
    raw: &str,
    pending: &Mutex<HashMap<u32, oneshot::Sender<Reply>>>,
    events: &mpsc::UnboundedSender<BrokerEvent>,
) {
    match parse_line(raw) {
        Ok(Line::Reply(reply)) => {
            if let Some(tx) = pending.lock().remove(&reply.seq) {
                let _ = tx.send(reply);
            }
        }
        Ok(Line::Status { body, .. }) => handle_broker_body(&body, events),
        Ok(Line::Version(v)) => log::debug!("[Broker] service version {}", v),
        Ok(Line::Handle(_)) | Ok(Line::Meter) => {}
        Err(e) => log::debug!("[Broker] dropping line {:?}: {}", raw, e),
    }
}

/// Dispatches one broker status body.
fn handle_broker_body(body: &str, events: &mpsc::UnboundedSender<BrokerEvent>) {
    if let Some(rest) = body.strip_prefix("radio list") {
        let mut properties = parse_kv(rest);
        // Listings for radios away from their LAN may omit the local
        // address; fall back to the public one so the entry still forms.
        if !properties.contains_key("ip") {
            if let Some(public_ip) = properties
                .get("publicip")
                .or_else(|| properties.get("public_ip"))
                .cloned()
            {
                properties.insert("ip".to_string(), public_ip);
            }
        }
        match DiscoveredRadio::from_properties(&properties, RadioSource::Broker) {
            Some(radio) => {
                log::debug!("[Broker] listed radio {} ({})", radio.serial, radio.model);
                let _ = events.send(BrokerEvent::RadioListed(radio));
            }
            None => log::debug!("[Broker] ignoring incomplete radio listing"),
        }
    } else if let Some(rest) = body.strip_prefix("radio connect_ready") {
        let properties = parse_kv(rest);
        match properties.get("handle") {
            Some(handle) => {
                log::info!("[Broker] connect_ready received");
                let _ = events.send(BrokerEvent::ConnectReady {
                    handle: handle.clone(),
                    serial: properties.get("serial").cloned(),
                });
            }
            None => log::warn!("[Broker] connect_ready without handle"),
        }
    } else {
        log::trace!("[Broker] ignoring status {:?}", body);
    }
}

fn parse_kv(text: &str) -> HashMap<String, String> {
    text.split_whitespace()
        .filter_map(|token| token.split_once('='))
        .map(|(k, v)| (k.to_ascii_lowercase(), v.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use tokio::io::AsyncReadExt;
    use tokio::net::{TcpListener, TcpStream};

    async fn listen() -> (TcpListener, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        (listener, addr)
    }

    async fn read_frame(stream: &mut TcpStream) -> String {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            stream.read_exact(&mut byte).await.unwrap();
            if byte[0] == b'\n' {
                break;
            }
            line.push(byte[0]);
        }
        String::from_utf8(line).unwrap()
    }

    #[tokio::test]
    async fn register_then_inventory_and_handle_delivery() {
        let (listener, addr) = listen().await;
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();

            let register = read_frame(&mut stream).await;
            assert!(register.starts_with("C1|application register name=TestApp platform="));
            assert!(register.contains("token=tok-123"));
            stream.write_all(b"R1|0|\n").await.unwrap();

            stream
                .write_all(
                    b"S0|radio list serial=WAN1 model=FLEX-6600 callsign=W9XYZ \
                      publicip=203.0.113.7 publictlsport=4994 publicudpport=4995\n",
                )
                .await
                .unwrap();

            let connect = read_frame(&mut stream).await;
            assert_eq!(connect, "C2|application connect serial=WAN1 hole_punch_port=0");
            stream
                .write_all(b"S0|radio connect_ready handle=AB12CD serial=WAN1\n")
                .await
                .unwrap();

            let mut sink = [0u8; 64];
            let _ = stream.read(&mut sink).await;
        });

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let stream = TcpStream::connect(addr).await.unwrap();
        let client = BrokerClient::from_stream(stream, "TestApp", "tok-123", events_tx)
            .await
            .unwrap();

        let listed = events_rx.recv().await.unwrap();
        let BrokerEvent::RadioListed(radio) = listed else {
            panic!("expected RadioListed, got {:?}", listed);
        };
        assert_eq!(radio.serial, "WAN1");
        assert_eq!(radio.source, RadioSource::Broker);
        assert_eq!(radio.public_ip.as_deref(), Some("203.0.113.7"));
        assert_eq!(radio.public_tls_port, Some(4994));
        assert_eq!(radio.public_udp_port, Some(4995));

        client.request_wan_connect("WAN1");
        let ready = events_rx.recv().await.unwrap();
        let BrokerEvent::ConnectReady { handle, serial } = ready else {
            panic!("expected ConnectReady, got {:?}", ready);
        };
        assert_eq!(handle, "AB12CD");
        assert_eq!(serial.as_deref(), Some("WAN1"));

        client.shutdown();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn register_rejection_is_an_auth_error() {
        let (listener, addr) = listen().await;
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let _ = read_frame(&mut stream).await;
            stream.write_all(b"R1|50000001|token invalid\n").await.unwrap();
            let mut sink = [0u8; 64];
            let _ = stream.read(&mut sink).await;
        });

        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let stream = TcpStream::connect(addr).await.unwrap();
        let result = BrokerClient::from_stream(stream, "TestApp", "expired", events_tx).await;

        match result {
            Err(BrokerError::RegisterRejected(message)) => {
                assert_eq!(message, "token invalid");
            }
            other => panic!(
                "expected RegisterRejected, got {:?}",
                other.map(|_| "client")
            ),
        }
    }

    #[tokio::test]
    async fn listing_without_lan_ip_falls_back_to_public() {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        handle_broker_body(
            "radio list serial=REMOTE1 publicip=198.51.100.4",
            &events_tx,
        );
        let BrokerEvent::RadioListed(radio) = events_rx.try_recv().unwrap() else {
            panic!("expected listing");
        };
        assert_eq!(radio.ip, "198.51.100.4");
        assert_eq!(radio.serial, "REMOTE1");
    }

    #[tokio::test]
    async fn incomplete_listing_ignored() {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        handle_broker_body("radio list model=FLEX-6600", &events_tx);
        assert!(events_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn session_end_reported() {
        let (listener, addr) = listen().await;
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let _ = read_frame(&mut stream).await;
            stream.write_all(b"R1|0|\n").await.unwrap();
            // Drop the socket.
        });

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let stream = TcpStream::connect(addr).await.unwrap();
        let _client = BrokerClient::from_stream(stream, "TestApp", "tok", events_tx)
            .await
            .unwrap();

        let event = events_rx.recv().await.unwrap();
        assert!(matches!(event, BrokerEvent::Closed));
    }
}
