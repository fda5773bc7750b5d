//! Status-body parsing.
//!
//! A status body is the part after the handle in an `S` frame:
//! `<object type> [<index>] <k>=<v> …`. The first token selects the object
//! type and determines how the next token is interpreted (slice index, EQ
//! target, or stream ID); everything after that is key=value pairs with
//! lowercased keys and verbatim values.

use std::collections::HashMap;

/// Synthetic property key under which an `audio_stream` status retains its
/// stream ID, so callers can extract it like any other property.
pub const STREAM_ID_KEY: &str = "_stream_id";

/// The eight canonical equalizer band center frequencies (Hz).
pub const EQ_BAND_FREQUENCIES: [u32; 8] = [63, 125, 250, 500, 1000, 2000, 4000, 8000];

/// Object type of a status message, with position-dependent context decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusKind {
    /// A slice update; index defaults to 0 when the body omits it.
    Slice {
        /// Slice index from the second token.
        index: u32,
    },
    /// An equalizer update for the RX (`rxsc`) or TX (`txsc`) chain.
    Eq {
        /// True for `rxsc`, false for `txsc`.
        is_rx: bool,
    },
    /// Radio-global status.
    Radio,
    /// DAX audio stream status (`audio_stream`, `dax_audio`, or `audio`).
    AudioStream,
    /// Meter definition status.
    Meter,
    /// Panadapter or waterfall status. Not interpreted by the core.
    Panadapter,
    /// Slice list status.
    SliceList,
    /// Unrecognized object type, kept for diagnostics.
    Other(String),
}

impl StatusKind {
    /// The wire token for this object type.
    ///
    /// Aliased inbound spellings (`dax_audio`, `audio`, `waterfall`)
    /// collapse to one canonical token.
    #[must_use]
    pub fn token(&self) -> &str {
        match self {
            Self::Slice { .. } => "slice",
            Self::Eq { .. } => "eq",
            Self::Radio => "radio",
            Self::AudioStream => "audio_stream",
            Self::Meter => "meter",
            Self::Panadapter => "panadapter",
            Self::SliceList => "slice_list",
            Self::Other(token) => token,
        }
    }
}

/// A parsed status body: object type plus its property map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    /// Object type with decoded positional context.
    pub kind: StatusKind,
    /// Key=value properties; keys lowercased, values verbatim.
    pub properties: HashMap<String, String>,
}

impl StatusMessage {
    /// Convenience accessor for a property value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Re-serializes this message to a status body.
    ///
    /// The inverse of [`parse_status_body`] up to key ordering (keys are
    /// emitted sorted) and object-type aliasing: parsing the result yields
    /// the same kind and the same key set.
    #[must_use]
    pub fn to_body(&self) -> String {
        let mut body = self.kind.token().to_string();
        match &self.kind {
            StatusKind::Slice { index } => {
                body.push(' ');
                body.push_str(&index.to_string());
            }
            StatusKind::Eq { is_rx } => {
                body.push(' ');
                body.push_str(if *is_rx { "rxsc" } else { "txsc" });
            }
            StatusKind::AudioStream => {
                if let Some(id) = self.properties.get(STREAM_ID_KEY) {
                    body.push(' ');
                    body.push_str(id);
                }
            }
            _ => {}
        }

        let mut keys: Vec<&String> = self
            .properties
            .keys()
            .filter(|k| k.as_str() != STREAM_ID_KEY)
            .collect();
        keys.sort();
        for key in keys {
            body.push(' ');
            body.push_str(key);
            body.push('=');
            body.push_str(&self.properties[key]);
        }
        body
    }
}

/// Parses a status body into its object type and property map.
///
/// Never fails: unknown object types become [`StatusKind::Other`] and
/// tokens that are not key=value are dropped with a trace log.
#[must_use]
pub fn parse_status_body(body: &str) -> StatusMessage {
    let mut tokens = body.split_whitespace().peekable();
    let object_type = tokens.next().unwrap_or("").to_ascii_lowercase();
    let mut properties = HashMap::new();

    let kind = match object_type.as_str() {
        "slice" => {
            // Second token is the index when it parses as an integer;
            // otherwise it falls through to key=value handling.
            let index = match tokens.peek().and_then(|t| t.parse::<u32>().ok()) {
                Some(index) => {
                    tokens.next();
                    index
                }
                None => 0,
            };
            StatusKind::Slice { index }
        }
        "eq" => {
            let is_rx = match tokens.peek().copied() {
                Some("rxsc") => {
                    tokens.next();
                    true
                }
                Some("txsc") => {
                    tokens.next();
                    false
                }
                _ => true,
            };
            StatusKind::Eq { is_rx }
        }
        "audio_stream" | "dax_audio" | "audio" => {
            if let Some(token) = tokens.peek() {
                if token.starts_with("0x") || token.starts_with("0X") {
                    properties.insert(STREAM_ID_KEY.to_string(), (*token).to_string());
                    tokens.next();
                }
            }
            StatusKind::AudioStream
        }
        "radio" => StatusKind::Radio,
        "meter" => StatusKind::Meter,
        "panadapter" | "waterfall" => StatusKind::Panadapter,
        "slice_list" => StatusKind::SliceList,
        other => StatusKind::Other(other.to_string()),
    };

    for token in tokens {
        match token.split_once('=') {
            Some((key, value)) => {
                properties.insert(key.to_ascii_lowercase(), value.to_string());
            }
            None => {
                log::trace!("dropping bare status token {:?}", token);
            }
        }
    }

    StatusMessage { kind, properties }
}

/// Extracts equalizer band values from a status property map.
///
/// Reads the eight lowercase keys `63hz` … `8000hz`; bands absent from the
/// map are absent from the result, so callers leave them unchanged.
#[must_use]
pub fn parse_eq_bands(properties: &HashMap<String, String>) -> Vec<(u32, i32)> {
    EQ_BAND_FREQUENCIES
        .iter()
        .filter_map(|&freq| {
            let value = properties.get(&format!("{}hz", freq))?;
            Some((freq, value.parse().ok()?))
        })
        .collect()
}
