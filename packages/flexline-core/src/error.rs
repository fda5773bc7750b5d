//! Centralized error types for the FlexLine core library.
//!
//! Each subsystem defines its own error enum next to the code that raises
//! it; this module aggregates them into [`RadioError`], the type that
//! reaches the controller and its bounded error log, and defines the
//! [`ErrorCode`] trait for machine-readable codes.
//!
//! Propagation rules (matching how each subsystem behaves):
//! - codec errors (protocol lines, VITA packets) are absorbed at the parse
//!   site: the offending line or datagram is dropped and logged;
//! - transport failures tear down the owning session;
//! - stream and resource failures surface to the controller without
//!   killing the control session.

use serde::Serialize;
use thiserror::Error;

use crate::audio::StreamError;
use crate::broker::BrokerError;
use crate::control::ControlError;
use crate::discovery::DiscoveryError;
use crate::protocol::ProtocolError;
use crate::utils::now_millis;
use crate::vita::VitaError;

/// Trait for error types that provide machine-readable error codes.
///
/// Implement this trait to provide consistent error codes across different
/// error conversion paths.
pub trait ErrorCode {
    /// Returns a machine-readable error code.
    fn code(&self) -> &'static str;
}

impl ErrorCode for ProtocolError {
    fn code(&self) -> &'static str {
        match self {
            Self::UnknownPrefix(_) => "unknown_line_prefix",
            Self::MalformedLine(_) => "malformed_line",
            Self::BadToken(_) => "bad_token",
        }
    }
}

impl ErrorCode for VitaError {
    fn code(&self) -> &'static str {
        match self {
            Self::Truncated { .. } => "vita_truncated",
            Self::SizeOverflow { .. } => "vita_size_overflow",
            Self::UnsupportedType(_) => "vita_unsupported_type",
            Self::BadPayload(_) => "vita_bad_payload",
        }
    }
}

impl ErrorCode for ControlError {
    fn code(&self) -> &'static str {
        match self {
            Self::Io(_) => "transport_failed",
            Self::Tls(_) => "tls_failed",
            Self::ConnectTimeout => "connect_timeout",
            Self::Disconnected => "disconnected",
            Self::Command { .. } => "command_failed",
        }
    }
}

impl ErrorCode for BrokerError {
    fn code(&self) -> &'static str {
        match self {
            Self::Io(_) => "broker_transport_failed",
            Self::Tls(_) => "broker_tls_failed",
            Self::RegisterRejected(_) => "broker_register_rejected",
            Self::TokenExpired => "token_expired",
            Self::Closed => "broker_closed",
        }
    }
}

impl ErrorCode for StreamError {
    fn code(&self) -> &'static str {
        match self {
            Self::Bind(_) => "udp_bind_failed",
            Self::Send(_) => "udp_send_failed",
            Self::OpusInit(_) => "opus_init_failed",
            Self::OpusDecode(_) => "opus_decode_failed",
            Self::NotRunning => "stream_not_running",
        }
    }
}

impl ErrorCode for DiscoveryError {
    fn code(&self) -> &'static str {
        match self {
            Self::SocketBind(_) => "discovery_bind_failed",
        }
    }
}

/// Application-wide error type for the FlexLine engine.
#[derive(Debug, Error)]
pub enum RadioError {
    /// Malformed control line or status token. Non-fatal.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Malformed VITA-49 datagram. Non-fatal; the packet is dropped.
    #[error("VITA-49 error: {0}")]
    Vita(#[from] VitaError),

    /// The radio answered a command with a failure result code.
    #[error("Command failed with result {code}: {message}")]
    Response {
        /// Eight-hex-digit result code from the `R` frame.
        code: String,
        /// Free-form message payload, possibly empty.
        message: String,
    },

    /// Control-session failure (socket, TLS, handshake timeout).
    #[error("Control session error: {0}")]
    Control(#[from] ControlError),

    /// SmartLink broker failure (transport or authentication).
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    /// DAX stream failure (bind, send, codec init).
    #[error("Audio stream error: {0}")]
    Stream(#[from] StreamError),

    /// Discovery listener failure (shared socket bind).
    #[error("Discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    /// Bearer-token acquisition failed; the user must re-authenticate.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// An operation required a connected session with a usable endpoint.
    #[error("Not connected to a radio")]
    NotConnected,

    /// A slice operation was issued before any slice existed.
    #[error("No active slice")]
    NoActiveSlice,
}

impl RadioError {
    /// Returns a machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Protocol(e) => e.code(),
            Self::Vita(e) => e.code(),
            Self::Response { .. } => "command_failed",
            Self::Control(e) => e.code(),
            Self::Broker(e) => e.code(),
            Self::Stream(e) => e.code(),
            Self::Discovery(e) => e.code(),
            Self::Auth(_) => "auth_failed",
            Self::NotConnected => "not_connected",
            Self::NoActiveSlice => "no_active_slice",
        }
    }

    /// Whether this error should tear down the control session.
    ///
    /// Codec and stream errors leave the session alive; transport and
    /// handshake failures do not.
    #[must_use]
    pub fn is_fatal_to_session(&self) -> bool {
        matches!(
            self,
            Self::Control(ControlError::Io(_))
                | Self::Control(ControlError::Tls(_))
                | Self::Control(ControlError::ConnectTimeout)
        )
    }
}

/// Convenient Result alias for controller-level operations.
pub type RadioResult<T> = Result<T, RadioError>;

// ─────────────────────────────────────────────────────────────────────────────
// Error Log Entries
// ─────────────────────────────────────────────────────────────────────────────

/// A captured user-visible failure, retained in the controller's bounded log.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorLogEntry {
    /// Machine-readable code, stable across releases.
    pub code: &'static str,
    /// Human-readable description.
    pub message: String,
    /// Unix timestamp in milliseconds.
    pub timestamp: u64,
}

impl ErrorLogEntry {
    /// Captures an error into a log entry, stamping the current time.
    #[must_use]
    pub fn capture(err: &RadioError) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
            timestamp: now_millis(),
        }
    }
}
