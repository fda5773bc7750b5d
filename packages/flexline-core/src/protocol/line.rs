//! Inbound line classification.
//!
//! One line, already stripped of its `\n` terminator, is classified by its
//! first character:
//!
//! - `V<rest>` — firmware version string
//! - `H<rest>` — client handle (hex)
//! - `R<seq>|<result>[|<message>]` — response to a sequenced command
//! - `S<handle>|<body>` — unsolicited status
//! - `M…` — meter frame, opaque to the core

use super::{ProtocolError, ProtocolResult};

/// A response frame, correlated to a command by sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Sequence number echoed from the `C<seq>|…` command.
    pub seq: u32,
    /// Result code: eight hex digits, or a short form like `0`.
    pub result: String,
    /// Free-form message payload. May contain `|` separators, which are
    /// kept verbatim as one string. Empty when the frame carries none.
    pub message: String,
}

impl Reply {
    /// Whether the result code indicates success.
    ///
    /// The radio emits `00000000` (or the short form `0`) for success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.result.chars().all(|c| c == '0') && !self.result.is_empty()
    }

    /// Whether the result code indicates failure (codes starting with `5`).
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.result.starts_with('5')
    }
}

/// A classified inbound line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    /// Firmware version, sent unsolicited during the handshake.
    Version(String),
    /// Client handle (hex), sent unsolicited during the handshake.
    Handle(String),
    /// Response to a sequenced command.
    Reply(Reply),
    /// Unsolicited status notification; body is parsed separately.
    Status {
        /// Hex handle of the client the status applies to.
        handle: String,
        /// Raw status body, `<object type> [<index>] <k>=<v> …`.
        body: String,
    },
    /// Meter frame. Opaque to the core; higher layers may decode it.
    Meter,
}

/// Classifies one inbound line.
///
/// Empty lines and unknown prefixes are errors so the caller can count
/// them; both are dropped without affecting the session.
pub fn parse_line(raw: &str) -> ProtocolResult<Line> {
    let line = raw.strip_suffix('\r').unwrap_or(raw);
    let mut chars = line.chars();
    let prefix = chars
        .next()
        .ok_or_else(|| ProtocolError::MalformedLine("empty line".into()))?;
    let rest = chars.as_str();

    match prefix {
        'V' => Ok(Line::Version(rest.to_string())),
        'H' => Ok(Line::Handle(rest.to_string())),
        'R' => parse_reply(rest),
        'S' => parse_status(rest),
        'M' => Ok(Line::Meter),
        other => Err(ProtocolError::UnknownPrefix(other)),
    }
}

/// Parses the remainder of an `R` frame: `<seq>|<result>[|<message>]`.
fn parse_reply(rest: &str) -> ProtocolResult<Line> {
    let mut parts = rest.splitn(3, '|');
    let seq_text = parts
        .next()
        .ok_or_else(|| ProtocolError::MalformedLine(rest.to_string()))?;
    let seq: u32 = seq_text
        .parse()
        .map_err(|_| ProtocolError::MalformedLine(format!("bad reply seq {:?}", seq_text)))?;
    let result = parts
        .next()
        .ok_or_else(|| ProtocolError::MalformedLine(format!("reply {} missing result", seq)))?
        .to_string();
    // Further `|` fragments belong to the message and are kept verbatim.
    let message = parts.next().unwrap_or("").to_string();

    Ok(Line::Reply(Reply {
        seq,
        result,
        message,
    }))
}

/// Parses the remainder of an `S` frame: `<handle>|<body>`.
fn parse_status(rest: &str) -> ProtocolResult<Line> {
    let (handle, body) = rest
        .split_once('|')
        .ok_or_else(|| ProtocolError::MalformedLine(format!("status missing body: {:?}", rest)))?;
    Ok(Line::Status {
        handle: handle.to_string(),
        body: body.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_line() {
        assert_eq!(
            parse_line("V3.6.12"),
            Ok(Line::Version("3.6.12".to_string()))
        );
    }

    #[test]
    fn test_handle_line() {
        assert_eq!(parse_line("H12AB"), Ok(Line::Handle("12AB".to_string())));
    }

    #[test]
    fn test_reply_with_empty_message() {
        let line = parse_line("R1|00000000|").unwrap();
        assert_eq!(
            line,
            Line::Reply(Reply {
                seq: 1,
                result: "00000000".to_string(),
                message: String::new(),
            })
        );
    }

    #[test]
    fn test_reply_without_message_field() {
        // No trailing |message yields an empty message.
        let Line::Reply(reply) = parse_line("R7|0").unwrap() else {
            panic!("expected reply");
        };
        assert_eq!(reply.seq, 7);
        assert_eq!(reply.message, "");
        assert!(reply.is_success());
    }

    #[test]
    fn test_reply_message_keeps_embedded_pipes() {
        let Line::Reply(reply) = parse_line("R7|0|0xC0000001|extra|bits").unwrap() else {
            panic!("expected reply");
        };
        assert_eq!(reply.message, "0xC0000001|extra|bits");
    }

    #[test]
    fn test_reply_failure_code() {
        let Line::Reply(reply) = parse_line("R3|50000015|no such slice").unwrap() else {
            panic!("expected reply");
        };
        assert!(reply.is_failure());
        assert!(!reply.is_success());
        assert_eq!(reply.message, "no such slice");
    }

    #[test]
    fn test_status_line() {
        let line = parse_line("S12AB|slice 0 mode=USB").unwrap();
        assert_eq!(
            line,
            Line::Status {
                handle: "12AB".to_string(),
                body: "slice 0 mode=USB".to_string(),
            }
        );
    }

    #[test]
    fn test_meter_line_is_opaque() {
        assert_eq!(parse_line("M\u{1}\u{2}binary"), Ok(Line::Meter));
    }

    #[test]
    fn test_unknown_prefix_rejected() {
        assert_eq!(parse_line("Xwhat"), Err(ProtocolError::UnknownPrefix('X')));
    }

    #[test]
    fn test_malformed_reply_rejected() {
        assert!(parse_line("Rnot-a-seq|0").is_err());
        assert!(parse_line("R9").is_err());
    }

    #[test]
    fn test_crlf_tolerated() {
        assert_eq!(
            parse_line("V3.6.12\r"),
            Ok(Line::Version("3.6.12".to_string()))
        );
    }
}
