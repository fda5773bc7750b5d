//! Control-session implementation.
//!
//! One `ControlConnection` is one session: it owns the socket, a reader
//! task, a writer task, and (once connected) a keepalive task. Sessions
//! are never reused; reconnecting means building a new instance, which is
//! how sequence numbers reset to 1. Every instance carries a process-wide
//! epoch number; events it produces are tagged with it so consumers can
//! discard input from a torn-down session.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::io::{AsyncRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;

use crate::events::{ConnectionEvent, EventEmitter};
use crate::protocol::{self, frame_command, parse_line, parse_status_body, Line, Reply, StatusMessage};
use crate::protocol_constants::{CONNECT_TIMEOUT_SECS, KEEPALIVE_INTERVAL_SECS};
use crate::tls;
use crate::utils::now_millis;

use super::{ConnectionKind, ConnectionStatus, ControlError, ControlResult};

/// Process-wide source of connection epochs.
static NEXT_EPOCH: AtomicU64 = AtomicU64::new(1);

trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

type BoxedStream = Box<dyn AsyncStream>;

/// What a session reports to its consumer, tagged with the session epoch.
#[derive(Debug)]
pub struct SessionEvent {
    /// Epoch of the session that produced this event.
    pub epoch: u64,
    /// The event itself.
    pub kind: SessionEventKind,
}

/// Session-to-consumer notifications.
#[derive(Debug)]
pub enum SessionEventKind {
    /// An unsolicited status line, already parsed.
    Status(StatusMessage),
    /// The session ended, remotely or via [`ControlConnection::disconnect`].
    Disconnected,
}

/// Options for [`ControlConnection::connect`].
#[derive(Debug, Clone, Copy)]
pub struct ConnectOptions {
    /// Transport flavor.
    pub kind: ConnectionKind,
    /// Deadline from TCP connect to the radio's `H` line.
    pub connect_timeout: Duration,
    /// Interval between keepalive pings.
    pub keepalive_interval: Duration,
}

impl ConnectOptions {
    /// Options for a plain-TCP LAN session.
    #[must_use]
    pub fn lan() -> Self {
        Self {
            kind: ConnectionKind::Lan,
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            keepalive_interval: Duration::from_secs(KEEPALIVE_INTERVAL_SECS),
        }
    }

    /// Options for a TLS WAN session.
    #[must_use]
    pub fn wan() -> Self {
        Self {
            kind: ConnectionKind::Wan,
            ..Self::lan()
        }
    }
}

/// A single control-channel session.
pub struct ControlConnection {
    epoch: u64,
    kind: ConnectionKind,
    status: RwLock<ConnectionStatus>,
    firmware: RwLock<Option<String>>,
    handle: RwLock<Option<String>>,
    /// Next command sequence number. Starts at 1 for every session.
    next_seq: AtomicU32,
    /// Completions awaiting their `R` frame, keyed by sequence number.
    pending: Mutex<HashMap<u32, oneshot::Sender<Reply>>>,
    writer_tx: mpsc::UnboundedSender<String>,
    events: mpsc::UnboundedSender<SessionEvent>,
    emitter: Arc<dyn EventEmitter>,
    handshake_tx: watch::Sender<bool>,
    cancel: CancellationToken,
    torn_down: AtomicBool,
}

impl ControlConnection {
    /// Opens a session and completes the `V`/`H` handshake.
    ///
    /// Status lines and the eventual disconnect notification arrive on
    /// `events`; lifecycle changes are also emitted through `emitter`.
    /// Fails with [`ControlError::ConnectTimeout`] if the radio does not
    /// hand out a client handle within `options.connect_timeout`.
    pub async fn connect(
        host: &str,
        port: u16,
        options: ConnectOptions,
        events: mpsc::UnboundedSender<SessionEvent>,
        emitter: Arc<dyn EventEmitter>,
    ) -> ControlResult<Arc<Self>> {
        let epoch = NEXT_EPOCH.fetch_add(1, Ordering::Relaxed);
        let deadline = Instant::now() + options.connect_timeout;

        emitter.emit_connection(ConnectionEvent::StateChanged {
            status: ConnectionStatus::Connecting,
            timestamp: now_millis(),
        });
        log::info!(
            "[Control] connecting to {}:{} ({:?}, epoch {})",
            host,
            port,
            options.kind,
            epoch
        );

        let stream = match timeout_at(deadline, open_stream(host, port, options.kind)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                emitter.emit_connection(ConnectionEvent::StateChanged {
                    status: ConnectionStatus::Disconnected,
                    timestamp: now_millis(),
                });
                return Err(e);
            }
            Err(_) => {
                emitter.emit_connection(ConnectionEvent::StateChanged {
                    status: ConnectionStatus::Disconnected,
                    timestamp: now_millis(),
                });
                return Err(ControlError::ConnectTimeout);
            }
        };

        let (read_half, write_half) = tokio::io::split(stream);
        let (writer_tx, writer_rx) = mpsc::unbounded_channel();
        let (handshake_tx, mut handshake_rx) = watch::channel(false);

        let conn = Arc::new(Self {
            epoch,
            kind: options.kind,
            status: RwLock::new(ConnectionStatus::Connecting),
            firmware: RwLock::new(None),
            handle: RwLock::new(None),
            next_seq: AtomicU32::new(1),
            pending: Mutex::new(HashMap::new()),
            writer_tx,
            events,
            emitter,
            handshake_tx,
            cancel: CancellationToken::new(),
            torn_down: AtomicBool::new(false),
        });

        conn.spawn_reader(read_half);
        conn.spawn_writer(writer_rx, write_half);

        // Wait for the radio's H line, bounded by the overall deadline.
        let handshake = timeout_at(deadline, handshake_rx.wait_for(|done| *done)).await;
        match handshake {
            Ok(Ok(_)) => {}
            Ok(Err(_)) | Err(_) => {
                // Channel closed means the reader died first; either way
                // the session never reached Connected.
                conn.shutdown(true);
                return Err(ControlError::ConnectTimeout);
            }
        }

        conn.spawn_keepalive(options.keepalive_interval);
        Ok(conn)
    }

    // ── accessors ────────────────────────────────────────────────────────────

    /// This session's epoch, matching the tag on its events.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Transport flavor of this session.
    #[must_use]
    pub fn kind(&self) -> ConnectionKind {
        self.kind
    }

    /// Current session status.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        *self.status.read()
    }

    /// Firmware version from the `V` line, once seen.
    #[must_use]
    pub fn firmware(&self) -> Option<String> {
        self.firmware.read().clone()
    }

    /// Client handle from the `H` line, once seen.
    #[must_use]
    pub fn handle(&self) -> Option<String> {
        self.handle.read().clone()
    }

    // ── command submission ───────────────────────────────────────────────────

    /// Sends a command without registering a completion. Any response is
    /// logged and discarded.
    pub fn send(&self, body: &str) {
        self.submit(body, None);
    }

    /// Sends a command and returns the receiver for its response.
    ///
    /// The completion is registered before the frame is written, so a
    /// fast responder cannot race it. If the session ends first, the
    /// receiver resolves to an error instead of a reply.
    pub fn request(&self, body: &str) -> oneshot::Receiver<Reply> {
        let (tx, rx) = oneshot::channel();
        self.submit(body, Some(tx));
        rx
    }

    /// Sends a command and awaits a successful response.
    ///
    /// Failure results (codes starting `5`) become
    /// [`ControlError::Command`]; a session teardown while waiting becomes
    /// [`ControlError::Disconnected`].
    pub async fn request_ok(&self, body: &str) -> ControlResult<Reply> {
        let reply = self
            .request(body)
            .await
            .map_err(|_| ControlError::Disconnected)?;
        if reply.is_failure() {
            return Err(ControlError::Command {
                code: reply.result,
                message: reply.message,
            });
        }
        Ok(reply)
    }

    fn submit(&self, body: &str, completion: Option<oneshot::Sender<Reply>>) {
        if self.torn_down.load(Ordering::SeqCst) {
            log::debug!("[Control] dropping command on torn-down session: {}", loggable(body));
            return; // completion drops; caller observes cancellation
        }

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        if let Some(tx) = completion {
            self.pending.lock().insert(seq, tx);
        }

        log::trace!("[Control] C{}|{}", seq, loggable(body));
        if self.writer_tx.send(frame_command(seq, body)).is_err() {
            // Writer task already gone; roll back the registration.
            self.pending.lock().remove(&seq);
        }
    }

    // ── teardown ─────────────────────────────────────────────────────────────

    /// Tears the session down without notifying observers.
    ///
    /// For internal reuse during reconnect attempts, where the consumer
    /// replaces the session immediately and a `Disconnected` event would
    /// only cause flicker. Pending completions are dropped uninvoked.
    pub fn teardown(&self) {
        self.shutdown(false);
    }

    /// Tears the session down and notifies observers.
    ///
    /// Idempotent: calling this on an already-disconnected session does
    /// nothing.
    pub fn disconnect(&self) {
        self.shutdown(true);
    }

    fn shutdown(&self, emit: bool) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }

        self.cancel.cancel();
        // Dropping the senders is the cancellation signal for callers
        // blocked in request(); no completion is invoked.
        self.pending.lock().clear();
        *self.status.write() = ConnectionStatus::Disconnected;

        if emit {
            log::info!("[Control] session epoch {} disconnected", self.epoch);
            self.emitter.emit_connection(ConnectionEvent::StateChanged {
                status: ConnectionStatus::Disconnected,
                timestamp: now_millis(),
            });
            let _ = self.events.send(SessionEvent {
                epoch: self.epoch,
                kind: SessionEventKind::Disconnected,
            });
        }
    }

    // ── background tasks ─────────────────────────────────────────────────────

    fn spawn_reader(self: &Arc<Self>, read_half: tokio::io::ReadHalf<BoxedStream>) {
        let conn = Arc::clone(self);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(read_half).lines();
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    line = lines.next_line() => match line {
                        Ok(Some(line)) => conn.handle_line(&line),
                        Ok(None) => {
                            log::debug!("[Control] peer closed the connection");
                            conn.shutdown(true);
                            break;
                        }
                        Err(e) => {
                            log::warn!("[Control] read error: {}", e);
                            conn.shutdown(true);
                            break;
                        }
                    }
                }
            }
        });
    }

    fn spawn_writer(
        self: &Arc<Self>,
        mut writer_rx: mpsc::UnboundedReceiver<String>,
        mut write_half: WriteHalf<BoxedStream>,
    ) {
        let conn = Arc::clone(self);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    frame = writer_rx.recv() => match frame {
                        Some(frame) => {
                            if let Err(e) = write_half.write_all(frame.as_bytes()).await {
                                log::warn!("[Control] write error: {}", e);
                                conn.shutdown(true);
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        });
    }

    fn spawn_keepalive(self: &Arc<Self>, interval: Duration) {
        let conn = Arc::clone(self);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => conn.send(&protocol::command::ping()),
                }
            }
        });
    }

    // ── inbound line handling ────────────────────────────────────────────────

    fn handle_line(&self, raw: &str) {
        match parse_line(raw) {
            Ok(Line::Version(version)) => {
                log::debug!("[Control] firmware {}", version);
                *self.firmware.write() = Some(version);
            }
            Ok(Line::Handle(handle)) => self.on_handle(handle),
            Ok(Line::Reply(reply)) => self.on_reply(reply),
            Ok(Line::Status { body, .. }) => {
                let _ = self.events.send(SessionEvent {
                    epoch: self.epoch,
                    kind: SessionEventKind::Status(parse_status_body(&body)),
                });
            }
            Ok(Line::Meter) => {}
            Err(e) => log::debug!("[Control] dropping line {:?}: {}", raw, e),
        }
    }

    fn on_handle(&self, handle: String) {
        log::debug!("[Control] client handle {}", handle);
        *self.handle.write() = Some(handle.clone());

        let first = {
            let mut status = self.status.write();
            if *status == ConnectionStatus::Connected {
                false
            } else {
                *status = ConnectionStatus::Connected;
                true
            }
        };
        if !first {
            return;
        }

        self.emitter.emit_connection(ConnectionEvent::StateChanged {
            status: ConnectionStatus::Connected,
            timestamp: now_millis(),
        });
        self.emitter.emit_connection(ConnectionEvent::HandshakeComplete {
            firmware: self.firmware.read().clone().unwrap_or_default(),
            handle,
            timestamp: now_millis(),
        });
        let _ = self.handshake_tx.send(true);
    }

    fn on_reply(&self, reply: Reply) {
        match self.pending.lock().remove(&reply.seq) {
            Some(tx) => {
                // Receiver may have been dropped by a caller that stopped
                // caring; that is not an error.
                let _ = tx.send(reply);
            }
            None => {
                log::debug!(
                    "[Control] discarding response for unregistered seq {} (result {})",
                    reply.seq,
                    reply.result
                );
            }
        }
    }
}

impl Drop for ControlConnection {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn open_stream(host: &str, port: u16, kind: ConnectionKind) -> ControlResult<BoxedStream> {
    match kind {
        ConnectionKind::Lan => {
            let tcp = TcpStream::connect((host, port)).await?;
            tcp.set_nodelay(true).ok();
            Ok(Box::new(tcp))
        }
        ConnectionKind::Wan => {
            let stream = tls::connect_tls(host, port)
                .await
                .map_err(|e| ControlError::Tls(e.to_string()))?;
            Ok(Box::new(stream))
        }
    }
}

/// Renders a command body for logging, with secrets removed.
fn loggable(body: &str) -> &str {
    if body.starts_with("wan validate") {
        "wan validate handle=<redacted>"
    } else {
        body
    }
}
