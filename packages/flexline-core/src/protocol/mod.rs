//! SmartSDR control-channel codec.
//!
//! The control channel is line-framed ASCII. Outbound commands are framed
//! as `C<seq>|<body>\n` ([`command`] builds the bodies, [`frame_command`]
//! adds the envelope). Inbound lines are classified by their first
//! character (`V`/`H`/`R`/`S`/`M`, see [`parse_line`]) and status bodies
//! are tokenized into typed messages by [`parse_status_body`].
//!
//! Parsing here never panics and never kills a session: a malformed line
//! yields a [`ProtocolError`] that callers absorb by dropping the line.

pub mod command;
mod line;
mod status;

pub use line::{parse_line, Line, Reply};
pub use status::{
    parse_eq_bands, parse_status_body, StatusKind, StatusMessage, EQ_BAND_FREQUENCIES,
    STREAM_ID_KEY,
};

use thiserror::Error;

/// Errors raised while parsing control-channel lines.
///
/// Always non-fatal: the offending line is logged and dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// First character of the line is not a known frame prefix.
    #[error("unknown line prefix {0:?}")]
    UnknownPrefix(char),

    /// Line had a known prefix but did not match its grammar.
    #[error("malformed line: {0}")]
    MalformedLine(String),

    /// A key=value token could not be split.
    #[error("bad token: {0}")]
    BadToken(String),
}

/// Convenient Result alias for codec operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Frames a command body for transmission: `C<seq>|<body>\n`.
///
/// Bodies never contain embedded newlines; the builders in [`command`]
/// guarantee this for everything the engine sends.
#[must_use]
pub fn frame_command(seq: u32, body: &str) -> String {
    format!("C{}|{}\n", seq, body)
}
