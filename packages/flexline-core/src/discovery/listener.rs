//! UDP beacon listener.
//!
//! Binds the well-known discovery port with address- and port-reuse plus
//! broadcast receive, so co-located clients can share it. Every datagram
//! runs through the VITA-49 parser and, if it is a valid beacon, upserts
//! the inventory. A companion sweep task evicts stale LAN entries.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use crate::protocol_constants::{DISCOVERY_PORT, DISCOVERY_STALE_SECS, DISCOVERY_STREAM_ID, FLEX_OUI};
use crate::vita;

use super::inventory::RadioInventory;
use super::types::{DiscoveredRadio, RadioSource};
use super::{DiscoveryError, DiscoveryResult};

/// Interval between staleness sweeps. Beacons arrive about once a second,
/// so sweeping at the same cadence bounds eviction lag to ~1 s past the
/// staleness window.
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Creates the shared discovery socket.
///
/// Sets up socket options so multiple clients on one host can all hear the
/// beacon broadcasts:
/// - SO_REUSEADDR for rapid restarts
/// - SO_REUSEPORT on Unix (other platforms degrade to exclusive binding)
/// - SO_BROADCAST to receive directed broadcasts
fn create_socket(port: u16) -> DiscoveryResult<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .map_err(DiscoveryError::SocketBind)?;

    if let Err(e) = socket.set_reuse_address(true) {
        log::warn!("[Discovery] failed to set SO_REUSEADDR: {}", e);
    }

    #[cfg(unix)]
    if let Err(e) = socket.set_reuse_port(true) {
        log::warn!("[Discovery] failed to set SO_REUSEPORT: {}", e);
    }

    if let Err(e) = socket.set_broadcast(true) {
        log::warn!("[Discovery] failed to set SO_BROADCAST: {}", e);
    }

    socket
        .set_nonblocking(true)
        .map_err(DiscoveryError::SocketBind)?;

    let bind_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    socket
        .bind(&bind_addr.into())
        .map_err(DiscoveryError::SocketBind)?;

    let std_socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(std_socket).map_err(DiscoveryError::SocketBind)
}

/// Decodes one datagram and upserts the inventory when it is a beacon.
///
/// Silent about anything that is not a well-formed FlexRadio beacon: wrong
/// stream ID, wrong OUI (when a class ID is present), or missing
/// serial/ip. Malformed packets log at trace level and are dropped.
fn process_datagram(inventory: &RadioInventory, datagram: &[u8]) {
    let packet = match vita::parse_packet(datagram) {
        Ok(packet) => packet,
        Err(e) => {
            log::trace!("[Discovery] dropping malformed datagram: {}", e);
            return;
        }
    };

    if !vita::is_discovery_type(packet.header.packet_type)
        || packet.stream_id != Some(DISCOVERY_STREAM_ID)
    {
        return;
    }

    // OUI verification only applies when the beacon carries a class ID.
    if let Some(oui) = packet.class_oui {
        if oui != FLEX_OUI {
            log::trace!("[Discovery] dropping beacon with foreign OUI {:#08x}", oui);
            return;
        }
    }

    let properties = match vita::parse_discovery_payload(packet.payload) {
        Ok(properties) => properties,
        Err(e) => {
            log::trace!("[Discovery] dropping beacon with bad payload: {}", e);
            return;
        }
    };

    match DiscoveredRadio::from_properties(&properties, RadioSource::Lan) {
        Some(radio) => inventory.upsert(radio),
        None => log::trace!("[Discovery] beacon missing serial or ip, dropped"),
    }
}

/// Background listener on the discovery port.
///
/// Owns one receive task and one eviction sweep task; both stop when
/// [`DiscoveryListener::shutdown`] is called or the listener is dropped.
pub struct DiscoveryListener {
    inventory: Arc<RadioInventory>,
    cancel: CancellationToken,
}

impl DiscoveryListener {
    /// Binds the discovery port and starts listening.
    pub fn start(inventory: Arc<RadioInventory>) -> DiscoveryResult<Self> {
        Self::start_on_port(inventory, DISCOVERY_PORT)
    }

    /// Binds an alternate port. Production uses [`DiscoveryListener::start`];
    /// tests bind an ephemeral port.
    pub fn start_on_port(inventory: Arc<RadioInventory>, port: u16) -> DiscoveryResult<Self> {
        let socket = create_socket(port)?;
        let cancel = CancellationToken::new();

        log::debug!("[Discovery] listening on UDP {}", port);

        let recv_inventory = Arc::clone(&inventory);
        let recv_cancel = cancel.clone();
        tokio::spawn(async move {
            let mut buf = [0u8; 2048];
            loop {
                tokio::select! {
                    _ = recv_cancel.cancelled() => break,
                    result = socket.recv_from(&mut buf) => match result {
                        Ok((len, _src)) => process_datagram(&recv_inventory, &buf[..len]),
                        Err(e) => {
                            log::warn!("[Discovery] recv error: {}", e);
                            break;
                        }
                    }
                }
            }
            log::debug!("[Discovery] receive loop finished");
        });

        let sweep_inventory = Arc::clone(&inventory);
        let sweep_cancel = cancel.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                tokio::select! {
                    _ = sweep_cancel.cancelled() => break,
                    _ = interval.tick() => {
                        sweep_inventory.sweep_stale(Duration::from_secs(DISCOVERY_STALE_SECS));
                    }
                }
            }
        });

        Ok(Self { inventory, cancel })
    }

    /// The inventory this listener feeds.
    #[must_use]
    pub fn inventory(&self) -> &Arc<RadioInventory> {
        &self.inventory
    }

    /// Stops both background tasks.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for DiscoveryListener {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
