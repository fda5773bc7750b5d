//! Event system for observers of the radio model.
//!
//! This module provides:
//! - [`EventEmitter`] trait for subsystems to emit events
//! - Event types for each domain (connection, slice, EQ, discovery, audio)
//! - [`BroadcastEventBridge`] mapping events onto a broadcast channel that
//!   GUI or headless observers subscribe to
//!
//! The controller never mutates observable state without emitting the
//! matching event, so an observer can reconstruct the model from the event
//! stream alone.

mod bridge;
mod emitter;

pub use bridge::BroadcastEventBridge;
pub use emitter::{EventEmitter, LoggingEventEmitter, NoopEventEmitter};

use serde::Serialize;

use crate::control::ConnectionStatus;
use crate::error::ErrorLogEntry;

/// Events broadcast to observers.
///
/// Each category has its own inner event type with specific variants.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "category", rename_all = "camelCase")]
pub enum RadioEvent {
    /// Control-session lifecycle events.
    Connection(ConnectionEvent),

    /// Slice state changes.
    Slice(SliceEvent),

    /// Equalizer state changes.
    Eq(EqEvent),

    /// Radio inventory changes (LAN beacons, broker listings, manual entries).
    Discovery(DiscoveryEvent),

    /// DAX audio stream lifecycle and statistics.
    Audio(AudioEvent),

    /// Transmit (PTT) state changes.
    Transmit(TransmitEvent),

    /// A user-visible failure was captured into the error log.
    Error(ErrorLogEntry),
}

/// Control-session lifecycle events.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ConnectionEvent {
    /// Session status changed (Disconnected / Connecting / Connected).
    StateChanged {
        /// New session status.
        status: ConnectionStatus,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// Handshake completed; firmware and handle are known.
    HandshakeComplete {
        /// Firmware version from the `V` line.
        firmware: String,
        /// Client handle (hex) from the `H` line.
        handle: String,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// The broker delivered a WAN handle for the selected radio.
    WanHandleReceived {
        /// Serial of the radio the handle authorizes.
        serial: String,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
}

/// Slice state changes.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SliceEvent {
    /// The active slice was created or updated; read the controller's
    /// snapshot for field values.
    Updated {
        /// Index of the updated slice.
        index: u32,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// The active slice was removed.
    Removed {
        /// Index of the removed slice.
        index: u32,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
}

/// Equalizer state changes.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EqEvent {
    /// An equalizer chain changed (enabled flag or band values).
    Updated {
        /// True for the RX chain (`rxsc`), false for TX (`txsc`).
        #[serde(rename = "isRx")]
        is_rx: bool,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
}

/// Why a radio left the inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RadioRemovalReason {
    /// No LAN beacon refreshed the entry within the staleness window.
    Stale,
    /// The entry was removed by explicit request.
    UserRequest,
}

/// Radio inventory changes.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DiscoveryEvent {
    /// A radio appeared in the inventory.
    RadioAdded {
        /// Radio serial number.
        serial: String,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// A known radio was refreshed or its fields changed.
    RadioUpdated {
        /// Radio serial number.
        serial: String,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// A radio left the inventory.
    RadioRemoved {
        /// Radio serial number.
        serial: String,
        /// Why it was removed.
        reason: RadioRemovalReason,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
}

/// DAX audio stream lifecycle and statistics.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AudioEvent {
    /// The RX DAX pipeline started; datagrams matching the stream ID are
    /// being decoded and delivered.
    RxStarted {
        /// Radio-assigned RX stream ID.
        #[serde(rename = "streamId")]
        stream_id: u32,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// The RX DAX pipeline stopped.
    RxStopped {
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// Batched RX packet statistics (at most one event per 100 packets).
    RxStats {
        /// Packets accepted since the pipeline started.
        packets: u64,
        /// Arrival time of the most recent packet (Unix millis).
        #[serde(rename = "lastPacketMillis")]
        last_packet_millis: u64,
    },
    /// The mic TX pipeline started.
    TxStarted {
        /// Radio-assigned TX stream ID.
        #[serde(rename = "streamId")]
        stream_id: u32,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// The mic TX pipeline stopped.
    TxStopped {
        /// Frames sent over the pipeline's lifetime.
        frames: u64,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
}

/// Transmit state changes.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TransmitEvent {
    /// PTT state changed, either optimistically on command or reconciled
    /// from a slice status.
    Changed {
        /// True while transmitting.
        active: bool,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
}

// From implementations for converting inner events to RadioEvent
impl From<ConnectionEvent> for RadioEvent {
    fn from(event: ConnectionEvent) -> Self {
        RadioEvent::Connection(event)
    }
}

impl From<SliceEvent> for RadioEvent {
    fn from(event: SliceEvent) -> Self {
        RadioEvent::Slice(event)
    }
}

impl From<EqEvent> for RadioEvent {
    fn from(event: EqEvent) -> Self {
        RadioEvent::Eq(event)
    }
}

impl From<DiscoveryEvent> for RadioEvent {
    fn from(event: DiscoveryEvent) -> Self {
        RadioEvent::Discovery(event)
    }
}

impl From<AudioEvent> for RadioEvent {
    fn from(event: AudioEvent) -> Self {
        RadioEvent::Audio(event)
    }
}

impl From<TransmitEvent> for RadioEvent {
    fn from(event: TransmitEvent) -> Self {
        RadioEvent::Transmit(event)
    }
}
