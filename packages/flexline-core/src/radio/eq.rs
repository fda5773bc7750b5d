//! Equalizer data model.
//!
//! The radio exposes two eight-band equalizers, one per chain (`rxsc` for
//! receive, `txsc` for transmit). Band keys are the canonical center
//! frequencies; values are dB in [-10, +10].

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::protocol::{parse_eq_bands, EQ_BAND_FREQUENCIES};

/// State of one equalizer chain.
///
/// The band map always holds exactly the eight canonical frequencies;
/// updates merge into it and never add or remove keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EqualizerState {
    /// Whether the chain is enabled.
    pub enabled: bool,
    bands: BTreeMap<u32, i32>,
}

impl Default for EqualizerState {
    fn default() -> Self {
        Self {
            enabled: false,
            bands: EQ_BAND_FREQUENCIES.iter().map(|&f| (f, 0)).collect(),
        }
    }
}

impl EqualizerState {
    /// Value of one band, or `None` for a non-canonical frequency.
    #[must_use]
    pub fn band(&self, freq: u32) -> Option<i32> {
        self.bands.get(&freq).copied()
    }

    /// The full band map, keyed by center frequency.
    #[must_use]
    pub fn bands(&self) -> &BTreeMap<u32, i32> {
        &self.bands
    }

    /// Sets one band, clamping to the radio's [-10, +10] range.
    ///
    /// Returns false (and changes nothing) for a non-canonical frequency.
    pub fn set_band(&mut self, freq: u32, value: i32) -> bool {
        match self.bands.get_mut(&freq) {
            Some(slot) => {
                *slot = value.clamp(-10, 10);
                true
            }
            None => false,
        }
    }

    /// Resets all bands to 0 dB.
    pub fn flatten(&mut self) {
        for value in self.bands.values_mut() {
            *value = 0;
        }
    }

    /// Merges one status line's properties into this chain.
    ///
    /// `mode` toggles the enabled flag; band keys update their band.
    /// Bands absent from the status are left unchanged.
    pub fn apply(&mut self, properties: &HashMap<String, String>) {
        if let Some(mode) = properties.get("mode") {
            self.enabled = mode == "1";
        }
        for (freq, value) in parse_eq_bands(properties) {
            self.set_band(freq, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::parse_status_body;

    #[test]
    fn default_has_exactly_eight_flat_bands() {
        let eq = EqualizerState::default();
        assert_eq!(eq.bands().len(), 8);
        assert!(eq.bands().values().all(|&v| v == 0));
        assert!(!eq.enabled);
    }

    #[test]
    fn apply_full_status() {
        let msg = parse_status_body(
            "eq rxsc mode=1 63hz=3 125hz=0 250hz=0 500hz=0 1000hz=0 2000hz=0 4000hz=0 8000hz=0",
        );
        let mut eq = EqualizerState::default();
        eq.apply(&msg.properties);

        assert!(eq.enabled);
        assert_eq!(eq.bands().len(), 8);
        assert_eq!(eq.band(63), Some(3));
        assert!(EQ_BAND_FREQUENCIES
            .iter()
            .filter(|&&f| f != 63)
            .all(|&f| eq.band(f) == Some(0)));
    }

    #[test]
    fn partial_status_leaves_other_bands_unchanged() {
        let mut eq = EqualizerState::default();
        eq.set_band(8000, -5);
        eq.apply(&parse_status_body("eq rxsc 63hz=2").properties);
        assert_eq!(eq.band(63), Some(2));
        assert_eq!(eq.band(8000), Some(-5));
        assert_eq!(eq.bands().len(), 8);
    }

    #[test]
    fn set_band_rejects_foreign_frequency_and_clamps() {
        let mut eq = EqualizerState::default();
        assert!(!eq.set_band(90, 5));
        assert_eq!(eq.bands().len(), 8);

        assert!(eq.set_band(63, 99));
        assert_eq!(eq.band(63), Some(10));
        assert!(eq.set_band(63, -99));
        assert_eq!(eq.band(63), Some(-10));
    }

    #[test]
    fn status_body_roundtrip_preserves_band_map() {
        // Render the chain as a status body, reparse it, and compare.
        let mut original = EqualizerState::default();
        original.enabled = true;
        original.set_band(63, 3);
        original.set_band(500, -7);
        original.set_band(8000, 10);

        let mut body = String::from("eq rxsc mode=1");
        for (freq, value) in original.bands() {
            body.push_str(&format!(" {}hz={}", freq, value));
        }

        let mut reparsed = EqualizerState::default();
        reparsed.apply(&parse_status_body(&body).properties);
        assert_eq!(reparsed, original);
    }

    #[test]
    fn flatten_zeroes_every_band() {
        let mut eq = EqualizerState::default();
        eq.set_band(125, 9);
        eq.set_band(2000, -4);
        eq.flatten();
        assert!(eq.bands().values().all(|&v| v == 0));
        assert_eq!(eq.bands().len(), 8);
    }
}
