//! Discovered-radio data model.

use std::collections::HashMap;

use serde::Serialize;

use crate::protocol_constants::{CONTROL_PORT, DEFAULT_WAN_TLS_PORT};

/// How a radio entered the inventory.
///
/// The source tag is sticky: repeat beacons refresh an entry but never
/// change how it was first added.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RadioSource {
    /// Heard as a broadcast beacon on the local network.
    Lan,
    /// Listed by the SmartLink broker.
    Broker,
    /// Added explicitly by IP.
    Manual,
}

/// A radio known to the inventory.
///
/// Identity is the serial number: two entries are equal iff their serials
/// are, regardless of any other field.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredRadio {
    /// Serial number; the inventory key.
    pub serial: String,
    /// Model string (e.g. `FLEX-6600`).
    pub model: String,
    /// Owner callsign, possibly empty.
    pub callsign: String,
    /// LAN IP address as reported in the beacon.
    pub ip: String,
    /// LAN control port.
    pub port: u16,
    /// Firmware version string, possibly empty.
    pub version: String,
    /// How this entry was added.
    pub source: RadioSource,
    /// Public IP for WAN connections, when known.
    pub public_ip: Option<String>,
    /// Public TLS control port for WAN connections.
    pub public_tls_port: Option<u16>,
    /// Public UDP port for WAN DAX audio.
    pub public_udp_port: Option<u16>,
    /// Whether the radio reports an active WAN registration.
    pub wan_connected: bool,
}

impl PartialEq for DiscoveredRadio {
    fn eq(&self, other: &Self) -> bool {
        self.serial == other.serial
    }
}

impl Eq for DiscoveredRadio {}

impl std::hash::Hash for DiscoveredRadio {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.serial.hash(state);
    }
}

fn first_nonempty<'a>(
    properties: &'a HashMap<String, String>,
    keys: &[&str],
) -> Option<&'a str> {
    keys.iter()
        .filter_map(|k| properties.get(*k))
        .map(String::as_str)
        .find(|v| !v.is_empty())
}

fn parse_port(properties: &HashMap<String, String>, keys: &[&str]) -> Option<u16> {
    first_nonempty(properties, keys).and_then(|v| v.parse().ok())
}

impl DiscoveredRadio {
    /// Builds an entry from a beacon or broker property map.
    ///
    /// Requires non-empty `serial` and `ip`; everything else falls back to
    /// a reasonable default (`model` falls back to `radio_type` then a
    /// generic label, `callsign` to `nickname`). Broker listings use
    /// underscored endpoint keys, beacons run them together; both spellings
    /// are accepted.
    #[must_use]
    pub fn from_properties(
        properties: &HashMap<String, String>,
        source: RadioSource,
    ) -> Option<Self> {
        let serial = first_nonempty(properties, &["serial"])?.to_string();
        let ip = first_nonempty(properties, &["ip"])?.to_string();

        Some(Self {
            serial,
            model: first_nonempty(properties, &["model", "radio_type"])
                .unwrap_or("FLEX-6000")
                .to_string(),
            callsign: first_nonempty(properties, &["callsign", "nickname"])
                .unwrap_or_default()
                .to_string(),
            ip,
            port: parse_port(properties, &["port"]).unwrap_or(CONTROL_PORT),
            version: first_nonempty(properties, &["version"])
                .unwrap_or_default()
                .to_string(),
            source,
            public_ip: first_nonempty(properties, &["publicip", "public_ip"])
                .map(str::to_string),
            public_tls_port: parse_port(properties, &["publictlsport", "public_tls_port"]),
            public_udp_port: parse_port(properties, &["publicudpport", "public_udp_port"]),
            wan_connected: matches!(
                first_nonempty(properties, &["wanconnected", "wan_connected"]),
                Some("1") | Some("true")
            ),
        })
    }

    /// Builds a manual entry from an address.
    #[must_use]
    pub fn manual(serial: impl Into<String>, ip: impl Into<String>, port: u16) -> Self {
        Self {
            serial: serial.into(),
            model: "FLEX-6000".to_string(),
            callsign: String::new(),
            ip: ip.into(),
            port,
            version: String::new(),
            source: RadioSource::Manual,
            public_ip: None,
            public_tls_port: None,
            public_udp_port: None,
            wan_connected: false,
        }
    }

    /// The TLS endpoint for a WAN connection, when the radio has one.
    #[must_use]
    pub fn wan_endpoint(&self) -> Option<(String, u16)> {
        let host = self.public_ip.clone()?;
        Some((host, self.public_tls_port.unwrap_or(DEFAULT_WAN_TLS_PORT)))
    }

    /// The plain TCP endpoint for a LAN connection.
    #[must_use]
    pub fn lan_endpoint(&self) -> (String, u16) {
        (self.ip.clone(), self.port)
    }
}
