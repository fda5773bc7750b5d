//! General utilities shared across the crate.

use std::time::{SystemTime, UNIX_EPOCH};

// ─────────────────────────────────────────────────────────────────────────────
// Time Utilities
// ─────────────────────────────────────────────────────────────────────────────

/// Returns the current Unix timestamp in milliseconds.
///
/// Returns 0 if the system clock is before the Unix epoch (shouldn't happen in practice).
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Returns the current Unix timestamp in whole seconds, truncated to 32 bits.
///
/// VITA-49 integer timestamps are a 32-bit word; the epoch wrap in 2106 is
/// the radio's problem as much as ours.
#[must_use]
pub fn epoch_seconds_u32() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

// ─────────────────────────────────────────────────────────────────────────────
// Hex Parsing
// ─────────────────────────────────────────────────────────────────────────────

/// Parses a radio-assigned 32-bit stream ID out of a response message fragment.
///
/// The radio pads success messages with whitespace and a trailing `|`, and
/// emits stream IDs either `0x`-prefixed or as bare hex. All of these parse:
/// `"0xC0000001"`, `"C0000001"`, `" 0xC0000001|"`.
#[must_use]
pub fn parse_stream_id(text: &str) -> Option<u32> {
    let trimmed = text.trim().trim_end_matches('|').trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if digits.is_empty() {
        return None;
    }
    u32::from_str_radix(digits, 16).ok()
}
