//! Outbound command bodies.
//!
//! Every function returns one command body: a single ASCII line without the
//! `C<seq>|` envelope (see [`super::frame_command`]) and without a newline.
//! Frequencies go on the wire in MHz with six decimal places; equalizer
//! band keys are capitalized `Hz` outbound even though status lines echo
//! them lowercase.

use std::fmt::Display;

use super::status::EQ_BAND_FREQUENCIES;

/// Formats a frequency in Hz as the wire's MHz representation (6 dp).
#[must_use]
pub fn format_mhz(freq_hz: u64) -> String {
    format!("{:.6}", freq_hz as f64 / 1_000_000.0)
}

fn eq_target(is_rx: bool) -> &'static str {
    if is_rx {
        "rxsc"
    } else {
        "txsc"
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Subscriptions & Client Binding
// ─────────────────────────────────────────────────────────────────────────────

#[must_use]
pub fn sub_radio() -> String {
    "sub radio".to_string()
}

#[must_use]
pub fn sub_slice_all() -> String {
    "sub slice all".to_string()
}

#[must_use]
pub fn sub_meter_list() -> String {
    "sub meter list".to_string()
}

#[must_use]
pub fn sub_audio_stream() -> String {
    "sub audio stream".to_string()
}

/// Identifies this client program to the radio.
#[must_use]
pub fn client_program(name: &str) -> String {
    format!("client program {}", name)
}

/// Registers our client handle for UDP stream routing.
#[must_use]
pub fn client_udp_register(handle: &str) -> String {
    format!("client udp_register handle={}", handle)
}

/// Tells the radio which local UDP port we listen on for DAX audio.
#[must_use]
pub fn client_udpport(port: u16) -> String {
    format!("client udpport {}", port)
}

/// Asks the radio to report the client's apparent IP (WAN sessions).
#[must_use]
pub fn client_ip() -> String {
    "client ip".to_string()
}

#[must_use]
pub fn ping() -> String {
    "ping".to_string()
}

/// Presents the broker-issued nonce over the control channel.
///
/// The handle is a one-time secret; callers must redact this command in logs.
#[must_use]
pub fn wan_validate(wan_handle: &str) -> String {
    format!("wan validate handle={}", wan_handle)
}

// ─────────────────────────────────────────────────────────────────────────────
// Slice
// ─────────────────────────────────────────────────────────────────────────────

/// Creates a new slice at the given frequency.
#[must_use]
pub fn slice_create(freq_hz: u64, ant: &str, mode: &str) -> String {
    format!(
        "slice create freq={} ant={} mode={}",
        format_mhz(freq_hz),
        ant,
        mode
    )
}

/// Tunes an existing slice.
#[must_use]
pub fn slice_tune(index: u32, freq_hz: u64) -> String {
    format!("slice t {} {}", index, format_mhz(freq_hz))
}

/// Sets one slice property.
///
/// Recognized keys: `mode`, `nr`, `nb`, `anf`, `agc_mode`, `agc_threshold`,
/// `rfgain`, `audio_level`, `rxant`, `dax`, `dax_tx`, `filter_lo`,
/// `filter_hi`.
#[must_use]
pub fn slice_set(index: u32, key: &str, value: impl Display) -> String {
    format!("slice set {} {}={}", index, key, value)
}

/// Sets the slice filter edges in one command.
#[must_use]
pub fn slice_set_filter(index: u32, low_hz: i32, high_hz: i32) -> String {
    format!("slice set {} filter_lo={} filter_hi={}", index, low_hz, high_hz)
}

/// Removes a slice.
#[must_use]
pub fn slice_remove(index: u32) -> String {
    format!("slice r {}", index)
}

#[must_use]
pub fn slice_list() -> String {
    "slice list".to_string()
}

// ─────────────────────────────────────────────────────────────────────────────
// Transmit
// ─────────────────────────────────────────────────────────────────────────────

/// Keys the transmitter (`xmit 1`) or unkeys it (`xmit 0`).
#[must_use]
pub fn xmit(on: bool) -> String {
    format!("xmit {}", u8::from(on))
}

// ─────────────────────────────────────────────────────────────────────────────
// Equalizer
// ─────────────────────────────────────────────────────────────────────────────

/// Enables or disables an equalizer chain.
#[must_use]
pub fn eq_mode(is_rx: bool, enabled: bool) -> String {
    format!("eq {} mode={}", eq_target(is_rx), u8::from(enabled))
}

/// Sets one equalizer band. Outbound keys use capital `Hz`.
#[must_use]
pub fn eq_band(is_rx: bool, band_hz: u32, value: i32) -> String {
    format!("eq {} {}Hz={}", eq_target(is_rx), band_hz, value)
}

/// Flattens all eight bands to 0 dB in a single command.
#[must_use]
pub fn eq_flat(is_rx: bool) -> String {
    let mut body = format!("eq {}", eq_target(is_rx));
    for freq in EQ_BAND_FREQUENCIES {
        body.push_str(&format!(" {}Hz=0", freq));
    }
    body
}

/// Requests a full equalizer status report.
#[must_use]
pub fn eq_info(is_rx: bool) -> String {
    format!("eq {} info", eq_target(is_rx))
}

// ─────────────────────────────────────────────────────────────────────────────
// DAX Streams
// ─────────────────────────────────────────────────────────────────────────────

/// Requests an RX DAX audio stream on the given channel.
#[must_use]
pub fn stream_create_dax_rx(channel: u32) -> String {
    format!("stream create type=dax_rx dax_channel={}", channel)
}

/// Requests the TX DAX audio stream.
#[must_use]
pub fn stream_create_dax_tx() -> String {
    "stream create type=dax_tx".to_string()
}

/// Releases a stream by its radio-assigned ID.
#[must_use]
pub fn stream_remove(stream_id: u32) -> String {
    format!("stream remove 0x{:X}", stream_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_mhz_six_decimals() {
        assert_eq!(format_mhz(14_225_000), "14.225000");
        assert_eq!(format_mhz(7_074_123), "7.074123");
        assert_eq!(format_mhz(0), "0.000000");
    }

    #[test]
    fn test_slice_commands() {
        assert_eq!(
            slice_create(14_225_000, "ANT1", "USB"),
            "slice create freq=14.225000 ant=ANT1 mode=USB"
        );
        assert_eq!(slice_tune(0, 7_074_000), "slice t 0 7.074000");
        assert_eq!(slice_set(0, "nr", 1), "slice set 0 nr=1");
        assert_eq!(
            slice_set_filter(2, -2700, -200),
            "slice set 2 filter_lo=-2700 filter_hi=-200"
        );
        assert_eq!(slice_remove(3), "slice r 3");
    }

    #[test]
    fn test_client_commands() {
        assert_eq!(client_program("FlexLine"), "client program FlexLine");
        assert_eq!(client_udpport(4991), "client udpport 4991");
        assert_eq!(
            client_udp_register("0x12AB"),
            "client udp_register handle=0x12AB"
        );
    }

    #[test]
    fn test_xmit() {
        assert_eq!(xmit(true), "xmit 1");
        assert_eq!(xmit(false), "xmit 0");
    }

    #[test]
    fn test_eq_band_outbound_capital_hz() {
        assert_eq!(eq_band(true, 63, 3), "eq rxsc 63Hz=3");
        assert_eq!(eq_band(false, 8000, -10), "eq txsc 8000Hz=-10");
    }

    #[test]
    fn test_eq_flat_covers_all_bands() {
        let body = eq_flat(true);
        assert_eq!(
            body,
            "eq rxsc 63Hz=0 125Hz=0 250Hz=0 500Hz=0 1000Hz=0 2000Hz=0 4000Hz=0 8000Hz=0"
        );
    }

    #[test]
    fn test_stream_commands() {
        assert_eq!(
            stream_create_dax_rx(1),
            "stream create type=dax_rx dax_channel=1"
        );
        assert_eq!(stream_create_dax_tx(), "stream create type=dax_tx");
        assert_eq!(stream_remove(0xC000_0001), "stream remove 0xC0000001");
    }

    #[test]
    fn test_wan_validate() {
        assert_eq!(wan_validate("ABCDEF"), "wan validate handle=ABCDEF");
    }

    #[test]
    fn test_no_embedded_newlines() {
        for body in [
            sub_radio(),
            sub_slice_all(),
            sub_meter_list(),
            sub_audio_stream(),
            client_ip(),
            ping(),
            eq_flat(false),
            eq_info(true),
        ] {
            assert!(!body.contains('\n'), "body {:?} embeds a newline", body);
        }
    }
}
