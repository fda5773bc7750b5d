//! Fixed protocol constants that should NOT be changed.
//!
//! These values are defined by external specifications (SmartSDR wire
//! protocol, VITA-49, SmartLink) and changing them would break protocol
//! compliance with the radio.

// ─────────────────────────────────────────────────────────────────────────────
// Well-Known Ports
// ─────────────────────────────────────────────────────────────────────────────

/// TCP control port on the radio (LAN, plain text).
pub const CONTROL_PORT: u16 = 4992;

/// UDP discovery port. Radios broadcast VITA-49 beacons here about once a second.
pub const DISCOVERY_PORT: u16 = 4992;

/// UDP port for DAX audio, both directions, on the LAN.
pub const DAX_UDP_PORT: u16 = 4991;

/// Default TLS control port advertised by WAN radios.
pub const DEFAULT_WAN_TLS_PORT: u16 = 4994;

/// SmartLink broker endpoint.
pub const BROKER_HOST: &str = "smartlink.flexradio.com";
pub const BROKER_PORT: u16 = 443;

// ─────────────────────────────────────────────────────────────────────────────
// VITA-49
// ─────────────────────────────────────────────────────────────────────────────

/// Stream ID carried by discovery beacon packets.
pub const DISCOVERY_STREAM_ID: u32 = 0x0000_0800;

/// FlexRadio's IEEE OUI, present in the class-ID words of beacon packets.
pub const FLEX_OUI: u32 = 0x001C_2D;

/// Samples per TX packet (20 ms at 24 kHz).
pub const TX_FRAME_SAMPLES: usize = 480;

/// Mic TX sample rate (Hz). The radio expects DAX TX audio at 24 kHz.
pub const TX_SAMPLE_RATE: u32 = 24_000;

/// RX delivery sample rate (Hz) after upsampling / Opus decode.
pub const RX_SAMPLE_RATE: u32 = 48_000;

/// LAN RX buffers at or below this stereo-pair count are treated as 24 kHz
/// and upsampled 2x to 48 kHz. Larger buffers are already 48 kHz.
pub const RX_UPSAMPLE_THRESHOLD: usize = 160;

// ─────────────────────────────────────────────────────────────────────────────
// Session Timing
// ─────────────────────────────────────────────────────────────────────────────

/// Interval between keepalive `ping` commands (seconds).
pub const KEEPALIVE_INTERVAL_SECS: u64 = 25;

/// Time allowed from `Connecting` to the radio's `H` handshake line (seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 15;

/// Delay between `wan validate` and the first subscription command
/// (milliseconds). The radio needs a beat to process validation.
pub const WAN_VALIDATE_DELAY_MS: u64 = 200;

/// A LAN discovery entry with no fresh beacon for this long is evicted (seconds).
pub const DISCOVERY_STALE_SECS: u64 = 5;

// ─────────────────────────────────────────────────────────────────────────────
// Result Codes
// ─────────────────────────────────────────────────────────────────────────────

/// Canonical success result in an `R` response frame (eight hex digits).
pub const RESULT_SUCCESS: &str = "00000000";

// ─────────────────────────────────────────────────────────────────────────────
// Internal Rate Limits
// ─────────────────────────────────────────────────────────────────────────────

/// RX packet statistics are surfaced at most once per this many packets.
pub const RX_STATS_BATCH: u64 = 100;

/// Maximum retained entries in the controller's error log.
pub const ERROR_LOG_CAPACITY: usize = 100;

/// Capacity of the event broadcast channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

// ─────────────────────────────────────────────────────────────────────────────
// Application Identity
// ─────────────────────────────────────────────────────────────────────────────

/// Program name reported to the radio via `client program` and to the
/// broker via `application register`. Appears in the radio's client list,
/// so consistency matters more than branding.
pub const APP_NAME: &str = "FlexLine";
