//! VITA-49 packet codec.
//!
//! The radio's streaming surfaces all speak VITA-49: discovery beacons are
//! Extension-Context packets, DAX audio arrives as IF-Data or Extension-Data
//! packets, and outbound mic audio is emitted as IF-Data. Headers are
//! big-endian 32-bit words:
//!
//! ```text
//! word 0: type[31:28] | classId[27] | trailer[26] | TSI[25:22] | TSF[21:20]
//!         | count[19:16] | sizeWords[15:0]
//! word 1: stream ID (types 1, 3, 4, 5)
//! then:   class ID (2 words, when classId), integer timestamp (1 word,
//!         when TSI != 0), fractional timestamp (2 words, when TSF != 0),
//!         payload, trailer (1 word, when trailer)
//! ```

use std::collections::HashMap;

use thiserror::Error;

// ─────────────────────────────────────────────────────────────────────────────
// Packet Types
// ─────────────────────────────────────────────────────────────────────────────

/// IF-Data packet with stream ID. Carries DAX audio samples.
pub const TYPE_IF_DATA: u8 = 1;

/// Extension-Data packet with stream ID. Some firmware uses this for audio.
pub const TYPE_EXT_DATA: u8 = 3;

/// Context packet.
pub const TYPE_CONTEXT: u8 = 4;

/// Extension-Context packet. Discovery beacons use this type.
pub const TYPE_EXT_CONTEXT: u8 = 5;

/// Whether an inbound packet type can carry DAX audio.
#[must_use]
pub fn is_audio_type(packet_type: u8) -> bool {
    matches!(packet_type, TYPE_IF_DATA | TYPE_EXT_DATA)
}

/// Whether an inbound packet type can be a discovery beacon.
#[must_use]
pub fn is_discovery_type(packet_type: u8) -> bool {
    matches!(packet_type, TYPE_EXT_DATA | TYPE_CONTEXT | TYPE_EXT_CONTEXT)
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Errors raised while decoding a VITA-49 datagram.
///
/// Always non-fatal: the datagram is dropped and the stream continues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VitaError {
    /// Datagram too short to hold the mandatory header words.
    #[error("datagram truncated at {len} bytes")]
    Truncated {
        /// Received datagram length.
        len: usize,
    },

    /// Header claims more words than the datagram holds, or fewer than its
    /// own prologue requires.
    #[error("claimed size {claimed_words} words does not fit {actual_bytes} bytes")]
    SizeOverflow {
        /// Word count from the header's size field.
        claimed_words: u16,
        /// Received datagram length.
        actual_bytes: usize,
    },

    /// Packet type is not one the caller accepts.
    #[error("unsupported packet type {0}")]
    UnsupportedType(u8),

    /// Payload failed content-level decoding (e.g. non-UTF-8 beacon text).
    #[error("bad payload: {0}")]
    BadPayload(String),
}

/// Convenient Result alias for codec operations.
pub type VitaResult<T> = Result<T, VitaError>;

// ─────────────────────────────────────────────────────────────────────────────
// Header
// ─────────────────────────────────────────────────────────────────────────────

/// Unpacked fields of header word 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VitaHeader {
    /// Packet type, bits 31:28.
    pub packet_type: u8,
    /// Class-ID words present, bit 27.
    pub class_id_present: bool,
    /// Trailer word present, bit 26.
    pub trailer_present: bool,
    /// Integer-timestamp kind, bits 25:22. Zero means absent.
    pub tsi: u8,
    /// Fractional-timestamp kind, bits 21:20. Zero means absent.
    pub tsf: u8,
    /// Packet counter, bits 19:16, monotone mod 16 within a stream.
    pub packet_count: u8,
    /// Total packet length in 32-bit words, bits 15:0.
    pub size_words: u16,
}

impl VitaHeader {
    /// Decodes header word 0.
    #[must_use]
    pub fn unpack(word: u32) -> Self {
        Self {
            packet_type: ((word >> 28) & 0xF) as u8,
            class_id_present: word & (1 << 27) != 0,
            trailer_present: word & (1 << 26) != 0,
            tsi: ((word >> 22) & 0xF) as u8,
            tsf: ((word >> 20) & 0x3) as u8,
            packet_count: ((word >> 16) & 0xF) as u8,
            size_words: (word & 0xFFFF) as u16,
        }
    }

    /// Encodes header word 0.
    #[must_use]
    pub fn pack(&self) -> u32 {
        (u32::from(self.packet_type) & 0xF) << 28
            | u32::from(self.class_id_present) << 27
            | u32::from(self.trailer_present) << 26
            | (u32::from(self.tsi) & 0xF) << 22
            | (u32::from(self.tsf) & 0x3) << 20
            | (u32::from(self.packet_count) & 0xF) << 16
            | u32::from(self.size_words)
    }

    /// Whether this packet type carries a stream-ID word.
    #[must_use]
    pub fn has_stream_id(&self) -> bool {
        matches!(
            self.packet_type,
            TYPE_IF_DATA | TYPE_EXT_DATA | TYPE_CONTEXT | TYPE_EXT_CONTEXT
        )
    }

    /// Number of prologue words before the payload.
    #[must_use]
    pub fn prologue_words(&self) -> u16 {
        let mut words = 1u16;
        if self.has_stream_id() {
            words += 1;
        }
        if self.class_id_present {
            words += 2;
        }
        if self.tsi != 0 {
            words += 1;
        }
        if self.tsf != 0 {
            words += 2;
        }
        words
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Parsing
// ─────────────────────────────────────────────────────────────────────────────

/// A decoded packet borrowing its payload from the datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VitaPacket<'a> {
    /// Decoded header word.
    pub header: VitaHeader,
    /// Stream ID when the packet type carries one.
    pub stream_id: Option<u32>,
    /// Organizationally-unique identifier from the class-ID words.
    pub class_oui: Option<u32>,
    /// Integer timestamp (seconds) when TSI is nonzero.
    pub timestamp_int: Option<u32>,
    /// Fractional timestamp when TSF is nonzero.
    pub timestamp_frac: Option<u64>,
    /// Payload bytes, trailer excluded.
    pub payload: &'a [u8],
}

fn read_word(buf: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

/// Decodes one datagram as a VITA-49 packet.
///
/// Datagrams shorter than 8 bytes are rejected outright; a header whose
/// size field does not fit the datagram is a [`VitaError::SizeOverflow`].
/// The datagram may be longer than the packet (trailing padding is
/// ignored); the header's size field is authoritative.
pub fn parse_packet(datagram: &[u8]) -> VitaResult<VitaPacket<'_>> {
    if datagram.len() < 8 {
        return Err(VitaError::Truncated {
            len: datagram.len(),
        });
    }

    let header = VitaHeader::unpack(read_word(datagram, 0));
    let total_bytes = usize::from(header.size_words) * 4;
    let trailer_words = u16::from(header.trailer_present);
    if total_bytes > datagram.len()
        || header.size_words < header.prologue_words() + trailer_words
    {
        return Err(VitaError::SizeOverflow {
            claimed_words: header.size_words,
            actual_bytes: datagram.len(),
        });
    }

    let mut offset = 4usize;
    let stream_id = if header.has_stream_id() {
        let id = read_word(datagram, offset);
        offset += 4;
        Some(id)
    } else {
        None
    };

    let class_oui = if header.class_id_present {
        let oui = read_word(datagram, offset) & 0x00FF_FFFF;
        offset += 8; // OUI word + packet-class word
        Some(oui)
    } else {
        None
    };

    let timestamp_int = if header.tsi != 0 {
        let ts = read_word(datagram, offset);
        offset += 4;
        Some(ts)
    } else {
        None
    };

    let timestamp_frac = if header.tsf != 0 {
        let hi = u64::from(read_word(datagram, offset));
        let lo = u64::from(read_word(datagram, offset + 4));
        offset += 8;
        Some(hi << 32 | lo)
    } else {
        None
    };

    // Trailer, when present, consumes one word off the end of the packet.
    let payload_end = total_bytes - usize::from(trailer_words) * 4;
    let payload = &datagram[offset..payload_end];

    Ok(VitaPacket {
        header,
        stream_id,
        class_oui,
        timestamp_int,
        timestamp_frac,
        payload,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Discovery Payload
// ─────────────────────────────────────────────────────────────────────────────

/// Decodes a discovery beacon payload into its property map.
///
/// The payload is UTF-8 text of space-separated `key=value` tokens. Keys
/// are lowercased; values are kept verbatim. Radios pad the payload with
/// NULs, which are stripped.
pub fn parse_discovery_payload(payload: &[u8]) -> VitaResult<HashMap<String, String>> {
    let text = std::str::from_utf8(payload)
        .map_err(|e| VitaError::BadPayload(format!("beacon not UTF-8: {}", e)))?;

    let mut properties = HashMap::new();
    for token in text.trim_matches(['\0', ' ', '\n']).split_whitespace() {
        if let Some((key, value)) = token.split_once('=') {
            properties.insert(key.to_ascii_lowercase(), value.to_string());
        }
    }
    Ok(properties)
}

// ─────────────────────────────────────────────────────────────────────────────
// TX Audio Emission
// ─────────────────────────────────────────────────────────────────────────────

/// Builds outbound DAX TX audio packets with monotone sequence and
/// sample-count fields.
///
/// One packet carries 480 mono samples at 24 kHz (20 ms), duplicated into
/// big-endian stereo float pairs. The fractional timestamp is the 64-bit
/// cumulative sample count before this packet; the packet counter wraps
/// mod 16.
#[derive(Debug)]
pub struct TxPacketBuilder {
    stream_id: u32,
    packet_count: u8,
    sample_count: u64,
}

impl TxPacketBuilder {
    /// Creates a builder for the given radio-assigned TX stream ID.
    #[must_use]
    pub fn new(stream_id: u32) -> Self {
        Self {
            stream_id,
            packet_count: 0,
            sample_count: 0,
        }
    }

    /// Cumulative samples emitted so far (the next packet's timestamp).
    #[must_use]
    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }

    /// Builds one packet from mono samples and advances the counters.
    ///
    /// `epoch_seconds` is the integer timestamp word (Unix seconds mod
    /// 2^32); the caller supplies it so this stays a pure function of its
    /// inputs.
    #[must_use]
    pub fn build(&mut self, samples: &[f32], epoch_seconds: u32) -> Vec<u8> {
        // hdr + stream + int-ts + frac-ts(2) + one stereo pair per sample
        let size_words = 5 + samples.len() * 2;
        let header = VitaHeader {
            packet_type: TYPE_IF_DATA,
            class_id_present: false,
            trailer_present: false,
            tsi: 1,
            tsf: 3,
            packet_count: self.packet_count,
            size_words: size_words as u16,
        };

        let mut packet = Vec::with_capacity(size_words * 4);
        packet.extend_from_slice(&header.pack().to_be_bytes());
        packet.extend_from_slice(&self.stream_id.to_be_bytes());
        packet.extend_from_slice(&epoch_seconds.to_be_bytes());
        packet.extend_from_slice(&self.sample_count.to_be_bytes());
        for &sample in samples {
            let be = sample.to_bits().to_be_bytes();
            packet.extend_from_slice(&be); // left
            packet.extend_from_slice(&be); // right, duplicated
        }

        self.packet_count = (self.packet_count + 1) & 0xF;
        self.sample_count += samples.len() as u64;
        packet
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol_constants::{DISCOVERY_STREAM_ID, FLEX_OUI, TX_FRAME_SAMPLES};

    fn build_beacon(payload: &str, with_class_id: bool) -> Vec<u8> {
        let mut padded = payload.to_string();
        while padded.len() % 4 != 0 {
            padded.push(' ');
        }
        let payload_bytes = padded.as_bytes();
        let prologue_words = if with_class_id { 4 } else { 2 };
        let size_words = prologue_words + payload_bytes.len() / 4;
        let header = VitaHeader {
            packet_type: TYPE_EXT_CONTEXT,
            class_id_present: with_class_id,
            trailer_present: false,
            tsi: 0,
            tsf: 0,
            packet_count: 0,
            size_words: size_words as u16,
        };
        let mut packet = header.pack().to_be_bytes().to_vec();
        packet.extend_from_slice(&DISCOVERY_STREAM_ID.to_be_bytes());
        if with_class_id {
            packet.extend_from_slice(&FLEX_OUI.to_be_bytes());
            packet.extend_from_slice(&0x0000_FFFFu32.to_be_bytes());
        }
        packet.extend_from_slice(payload_bytes);
        packet
    }

    #[test]
    fn test_header_roundtrip() {
        let header = VitaHeader {
            packet_type: TYPE_IF_DATA,
            class_id_present: true,
            trailer_present: true,
            tsi: 1,
            tsf: 3,
            packet_count: 9,
            size_words: 965,
        };
        assert_eq!(VitaHeader::unpack(header.pack()), header);
    }

    #[test]
    fn test_short_datagram_dropped() {
        assert_eq!(
            parse_packet(&[0u8; 7]),
            Err(VitaError::Truncated { len: 7 })
        );
    }

    #[test]
    fn test_size_overflow_rejected() {
        let header = VitaHeader {
            packet_type: TYPE_IF_DATA,
            class_id_present: false,
            trailer_present: false,
            tsi: 0,
            tsf: 0,
            packet_count: 0,
            size_words: 100,
        };
        let mut datagram = header.pack().to_be_bytes().to_vec();
        datagram.extend_from_slice(&[0u8; 12]);
        assert!(matches!(
            parse_packet(&datagram),
            Err(VitaError::SizeOverflow { .. })
        ));
    }

    #[test]
    fn test_discovery_beacon_parses() {
        let datagram = build_beacon("serial=ABC123 ip=192.168.1.20 ", true);
        let packet = parse_packet(&datagram).unwrap();
        assert_eq!(packet.header.packet_type, TYPE_EXT_CONTEXT);
        assert_eq!(packet.stream_id, Some(DISCOVERY_STREAM_ID));
        assert_eq!(packet.class_oui, Some(FLEX_OUI));

        let props = parse_discovery_payload(packet.payload).unwrap();
        assert_eq!(props.get("serial").map(String::as_str), Some("ABC123"));
        assert_eq!(props.get("ip").map(String::as_str), Some("192.168.1.20"));
    }

    #[test]
    fn test_beacon_without_class_id() {
        let datagram = build_beacon("serial=XYZ9 ip=10.0.0.2 pad=pad ", false);
        let packet = parse_packet(&datagram).unwrap();
        assert_eq!(packet.class_oui, None);
        assert_eq!(packet.stream_id, Some(DISCOVERY_STREAM_ID));
    }

    #[test]
    fn test_discovery_payload_lowercases_keys() {
        let props = parse_discovery_payload(b"Serial=A Model=FLEX-6600\0\0").unwrap();
        assert_eq!(props.get("serial").map(String::as_str), Some("A"));
        assert_eq!(props.get("model").map(String::as_str), Some("FLEX-6600"));
    }

    #[test]
    fn test_trailer_consumes_one_word() {
        // 1 header + 1 stream + 2 payload words + 1 trailer = 5 words
        let header = VitaHeader {
            packet_type: TYPE_IF_DATA,
            class_id_present: false,
            trailer_present: true,
            tsi: 0,
            tsf: 0,
            packet_count: 0,
            size_words: 5,
        };
        let mut datagram = header.pack().to_be_bytes().to_vec();
        datagram.extend_from_slice(&0xDEAD_BEEFu32.to_be_bytes()); // stream
        datagram.extend_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]); // payload
        datagram.extend_from_slice(&[0; 4]); // trailer
        let packet = parse_packet(&datagram).unwrap();
        assert_eq!(packet.payload, &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_tx_roundtrip_through_parser() {
        let mut builder = TxPacketBuilder::new(0x4000_0001);
        let samples = vec![0.25f32; TX_FRAME_SAMPLES];
        let snapshot = builder.sample_count();

        let datagram = builder.build(&samples, 1_700_000_000);
        let packet = parse_packet(&datagram).unwrap();

        assert_eq!(packet.header.packet_type, TYPE_IF_DATA);
        assert_eq!(packet.stream_id, Some(0x4000_0001));
        assert_eq!(packet.timestamp_int, Some(1_700_000_000));
        assert_eq!(packet.timestamp_frac, Some(snapshot));
        // 480 stereo pairs of 8 bytes each
        assert_eq!(packet.payload.len(), TX_FRAME_SAMPLES * 8);

        // Left and right carry the duplicated sample, big-endian.
        let left = f32::from_bits(u32::from_be_bytes(packet.payload[0..4].try_into().unwrap()));
        let right = f32::from_bits(u32::from_be_bytes(packet.payload[4..8].try_into().unwrap()));
        assert_eq!(left, 0.25);
        assert_eq!(right, 0.25);
    }

    #[test]
    fn test_tx_counters_advance() {
        let mut builder = TxPacketBuilder::new(1);
        let samples = vec![0.0f32; TX_FRAME_SAMPLES];
        for i in 0..20u64 {
            let datagram = builder.build(&samples, 0);
            let packet = parse_packet(&datagram).unwrap();
            assert_eq!(u64::from(packet.header.packet_count), i % 16);
            assert_eq!(packet.timestamp_frac, Some(i * TX_FRAME_SAMPLES as u64));
        }
    }
}
