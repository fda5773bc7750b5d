//! TCP/TLS control-channel session.
//!
//! The control channel is the radio's command surface: a line-framed ASCII
//! protocol over plain TCP on the LAN or TLS on the WAN. This module owns
//! the session state machine:
//!
//! ```text
//! Disconnected ──connect──▶ Connecting ──V,H──▶ Connected ──disconnect/error──▶ Disconnected
//!      ▲                        │                  │
//!      └──timeout/error─────────┘──────────────────┘
//! ```
//!
//! Commands are sequenced (`C<seq>|…`) and correlated to `R` responses by
//! sequence number; unsolicited `S` status lines are forwarded to the
//! session's event channel for the controller to merge.

mod connection;

pub use connection::{ConnectOptions, ControlConnection, SessionEvent, SessionEventKind};

use serde::Serialize;
use thiserror::Error;

/// Session status, in state-machine order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionStatus {
    /// No session.
    Disconnected,
    /// TCP/TLS established or in progress; waiting for the `V`/`H` handshake.
    Connecting,
    /// Handshake complete; commands may be issued.
    Connected,
}

/// Transport flavor of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionKind {
    /// Plain TCP on the local network.
    Lan,
    /// TLS to the radio's public endpoint, brokered by SmartLink.
    Wan,
}

/// Errors raised by the control session.
#[derive(Debug, Error)]
pub enum ControlError {
    /// Socket-level failure. Fatal to the session.
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS handshake failure. Fatal to the connect attempt.
    #[error("TLS error: {0}")]
    Tls(String),

    /// The radio did not complete the `V`/`H` handshake in time.
    #[error("timed out waiting for handshake")]
    ConnectTimeout,

    /// The session ended before (or while) a command completed. Pending
    /// completions observe this as their cancellation signal.
    #[error("session disconnected")]
    Disconnected,

    /// The radio answered a command with a failure result.
    #[error("command failed with result {code}: {message}")]
    Command {
        /// Result code from the `R` frame (starts with `5`).
        code: String,
        /// Free-form failure message.
        message: String,
    },
}

/// Convenient Result alias for session operations.
pub type ControlResult<T> = Result<T, ControlError>;
