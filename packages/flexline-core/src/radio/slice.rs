//! Slice data model.
//!
//! A slice is one logical receiver inside the radio. State is populated
//! from unsolicited status lines and mutated locally by commands that then
//! echo back via status.

use std::collections::HashMap;

use serde::Serialize;

/// Demodulation mode of a slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SliceMode {
    Lsb,
    Usb,
    Cw,
    Cwl,
    Am,
    Sam,
    Fm,
    Nfm,
    Digu,
    Digl,
    Rtty,
}

impl SliceMode {
    /// Wire token for this mode (uppercase, as the radio expects).
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lsb => "LSB",
            Self::Usb => "USB",
            Self::Cw => "CW",
            Self::Cwl => "CWL",
            Self::Am => "AM",
            Self::Sam => "SAM",
            Self::Fm => "FM",
            Self::Nfm => "NFM",
            Self::Digu => "DIGU",
            Self::Digl => "DIGL",
            Self::Rtty => "RTTY",
        }
    }
}

impl std::str::FromStr for SliceMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "LSB" => Ok(Self::Lsb),
            "USB" => Ok(Self::Usb),
            "CW" => Ok(Self::Cw),
            "CWL" => Ok(Self::Cwl),
            "AM" => Ok(Self::Am),
            "SAM" => Ok(Self::Sam),
            "FM" => Ok(Self::Fm),
            "NFM" => Ok(Self::Nfm),
            "DIGU" => Ok(Self::Digu),
            "DIGL" => Ok(Self::Digl),
            "RTTY" => Ok(Self::Rtty),
            _ => Err(()),
        }
    }
}

/// AGC mode of a slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AgcMode {
    Off,
    Slow,
    Med,
    Fast,
}

impl AgcMode {
    /// Wire token for this AGC mode.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Slow => "slow",
            Self::Med => "med",
            Self::Fast => "fast",
        }
    }
}

impl std::str::FromStr for AgcMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "off" => Ok(Self::Off),
            "slow" => Ok(Self::Slow),
            "med" => Ok(Self::Med),
            "fast" => Ok(Self::Fast),
            _ => Err(()),
        }
    }
}

fn parse_flag(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

/// State of one slice, merged from status lines.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SliceState {
    /// Slice index on the radio.
    pub index: u32,
    /// Tuned frequency in Hz.
    pub frequency_hz: u64,
    /// Demodulation mode.
    pub mode: SliceMode,
    /// Low filter edge in Hz (signed; below carrier for LSB-family modes).
    pub filter_low: i32,
    /// High filter edge in Hz.
    pub filter_high: i32,
    /// Noise reduction enabled.
    pub nr: bool,
    /// Noise blanker enabled.
    pub nb: bool,
    /// Auto-notch filter enabled.
    pub anf: bool,
    /// AGC mode.
    pub agc_mode: AgcMode,
    /// AGC threshold, 0..100.
    pub agc_threshold: u32,
    /// RF gain in dB.
    pub rf_gain: i32,
    /// Audio level, 0..100.
    pub audio_level: u32,
    /// Selected RX antenna.
    pub rx_antenna: String,
    /// Antennas the radio offers.
    pub antenna_list: Vec<String>,
    /// Whether this slice carries the transmitter.
    pub transmit: bool,
    /// Unrecognized status keys, kept verbatim for diagnostics.
    #[serde(skip)]
    pub extras: HashMap<String, String>,
}

impl SliceState {
    /// A fresh slice with the radio's usual defaults.
    #[must_use]
    pub fn new(index: u32) -> Self {
        Self {
            index,
            frequency_hz: 0,
            mode: SliceMode::Usb,
            filter_low: 100,
            filter_high: 2800,
            nr: false,
            nb: false,
            anf: false,
            agc_mode: AgcMode::Med,
            agc_threshold: 65,
            rf_gain: 0,
            audio_level: 50,
            rx_antenna: String::new(),
            antenna_list: Vec::new(),
            transmit: false,
            extras: HashMap::new(),
        }
    }

    /// Merges one status line's properties into this slice.
    ///
    /// Recognized keys set their field; unknown keys land in
    /// [`SliceState::extras`]. Unparseable values leave the field
    /// unchanged (the next status will usually correct them).
    pub fn apply(&mut self, properties: &HashMap<String, String>) {
        for (key, value) in properties {
            match key.as_str() {
                "rf_frequency" | "freq" => {
                    if let Ok(mhz) = value.parse::<f64>() {
                        self.frequency_hz = (mhz * 1_000_000.0).round() as u64;
                    }
                }
                "mode" => {
                    if let Ok(mode) = value.parse() {
                        self.mode = mode;
                    }
                }
                "filter_lo" => {
                    if let Ok(v) = value.parse() {
                        self.filter_low = v;
                    }
                }
                "filter_hi" => {
                    if let Ok(v) = value.parse() {
                        self.filter_high = v;
                    }
                }
                "nr" => self.nr = parse_flag(value),
                "nb" => self.nb = parse_flag(value),
                "anf" => self.anf = parse_flag(value),
                "agc_mode" => {
                    if let Ok(mode) = value.parse() {
                        self.agc_mode = mode;
                    }
                }
                "agc_threshold" => {
                    if let Ok(v) = value.parse() {
                        self.agc_threshold = v;
                    }
                }
                "rfgain" => {
                    if let Ok(v) = value.parse() {
                        self.rf_gain = v;
                    }
                }
                "audio_level" => {
                    if let Ok(v) = value.parse() {
                        self.audio_level = v;
                    }
                }
                "rxant" => self.rx_antenna = value.clone(),
                "ant_list" => {
                    self.antenna_list = value.split(',').map(str::to_string).collect();
                }
                "tx" => self.transmit = parse_flag(value),
                _ => {
                    self.extras.insert(key.clone(), value.clone());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::parse_status_body;

    #[test]
    fn mode_tokens_roundtrip() {
        for mode in [
            SliceMode::Lsb,
            SliceMode::Usb,
            SliceMode::Cw,
            SliceMode::Cwl,
            SliceMode::Am,
            SliceMode::Sam,
            SliceMode::Fm,
            SliceMode::Nfm,
            SliceMode::Digu,
            SliceMode::Digl,
            SliceMode::Rtty,
        ] {
            assert_eq!(mode.as_str().parse::<SliceMode>().unwrap(), mode);
        }
        assert_eq!("usb".parse::<SliceMode>().unwrap(), SliceMode::Usb);
        assert!("QAM".parse::<SliceMode>().is_err());
    }

    #[test]
    fn apply_full_status_line() {
        let msg = parse_status_body(
            "slice 0 rf_frequency=14.225000 mode=USB nr=1 filter_lo=200 filter_hi=2700",
        );
        let mut slice = SliceState::new(0);
        slice.apply(&msg.properties);

        assert_eq!(slice.frequency_hz, 14_225_000);
        assert_eq!(slice.mode, SliceMode::Usb);
        assert!(slice.nr);
        assert_eq!(slice.filter_low, 200);
        assert_eq!(slice.filter_high, 2700);
    }

    #[test]
    fn apply_keeps_unrecognized_keys() {
        let msg = parse_status_body("slice 0 wide=0 record_time=3.5");
        let mut slice = SliceState::new(0);
        slice.apply(&msg.properties);
        assert_eq!(slice.extras.get("wide").map(String::as_str), Some("0"));
        assert_eq!(
            slice.extras.get("record_time").map(String::as_str),
            Some("3.5")
        );
    }

    #[test]
    fn apply_tolerates_garbage_values() {
        let mut slice = SliceState::new(0);
        slice.frequency_hz = 7_000_000;
        let msg = parse_status_body("slice 0 rf_frequency=bogus agc_threshold=high");
        slice.apply(&msg.properties);
        // Unchanged rather than corrupted.
        assert_eq!(slice.frequency_hz, 7_000_000);
        assert_eq!(slice.agc_threshold, 65);
    }

    #[test]
    fn antenna_list_splits_on_commas() {
        let mut slice = SliceState::new(0);
        let msg = parse_status_body("slice 0 ant_list=ANT1,ANT2,XVTA rxant=ANT2");
        slice.apply(&msg.properties);
        assert_eq!(slice.antenna_list, vec!["ANT1", "ANT2", "XVTA"]);
        assert_eq!(slice.rx_antenna, "ANT2");
    }

    #[test]
    fn tx_flag_reconciles() {
        let mut slice = SliceState::new(0);
        slice.apply(&parse_status_body("slice 0 tx=1").properties);
        assert!(slice.transmit);
        slice.apply(&parse_status_body("slice 0 tx=0").properties);
        assert!(!slice.transmit);
    }
}
