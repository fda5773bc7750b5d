//! Runtime configuration.
//!
//! Everything here is tunable per deployment; fixed wire constants live in
//! [`crate::protocol_constants`]. All fields have sensible defaults.

use serde::{Deserialize, Serialize};

use crate::protocol_constants::{
    CONNECT_TIMEOUT_SECS, DAX_UDP_PORT, DISCOVERY_STALE_SECS, EVENT_CHANNEL_CAPACITY,
    KEEPALIVE_INTERVAL_SECS,
};

/// Configuration for the DAX audio pipelines.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AudioConfig {
    /// Local UDP port for DAX RX on the LAN.
    pub dax_port: u16,

    /// DAX channel requested for RX audio.
    pub dax_channel: u32,

    /// Capacity of the mic sample ring between the realtime thread and the
    /// send worker, in samples at 24 kHz. One second absorbs any realistic
    /// scheduling hiccup without audible drops.
    pub mic_ring_samples: usize,

    /// Whether PTT-down also starts the mic TX pipeline.
    pub mic_tx_enabled: bool,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            dax_port: DAX_UDP_PORT,
            dax_channel: 1,
            mic_ring_samples: 24_000,
            mic_tx_enabled: true,
        }
    }
}

impl AudioConfig {
    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.mic_ring_samples < 960 {
            return Err("mic_ring_samples must hold at least two frames (960)".to_string());
        }
        if self.dax_channel == 0 {
            return Err("dax_channel is 1-based".to_string());
        }
        Ok(())
    }
}

/// Configuration for the FlexLine engine.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    /// Program name reported to the radio and the broker.
    pub program_name: String,

    /// Seconds between keepalive pings on the control channel.
    pub keepalive_interval_secs: u64,

    /// Seconds allowed from TCP connect to the radio's `H` line.
    pub connect_timeout_secs: u64,

    /// Seconds without a beacon before a LAN radio is evicted.
    pub discovery_stale_secs: u64,

    /// Audio pipeline configuration.
    #[serde(default)]
    pub audio: AudioConfig,

    /// Capacity of the event broadcast channel.
    pub event_channel_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            program_name: crate::protocol_constants::APP_NAME.to_string(),
            keepalive_interval_secs: KEEPALIVE_INTERVAL_SECS,
            connect_timeout_secs: CONNECT_TIMEOUT_SECS,
            discovery_stale_secs: DISCOVERY_STALE_SECS,
            audio: AudioConfig::default(),
            event_channel_capacity: EVENT_CHANNEL_CAPACITY,
        }
    }
}

impl Config {
    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.program_name.is_empty() || self.program_name.contains(char::is_whitespace) {
            return Err("program_name must be a single non-empty token".to_string());
        }
        if self.keepalive_interval_secs == 0 {
            return Err("keepalive_interval_secs must be >= 1".to_string());
        }
        if self.connect_timeout_secs == 0 {
            return Err("connect_timeout_secs must be >= 1".to_string());
        }
        if self.event_channel_capacity == 0 {
            return Err(
                "event_channel_capacity must be >= 1 (broadcast::channel panics on 0)".to_string(),
            );
        }
        self.audio.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn program_name_must_be_one_token() {
        let mut config = Config::default();
        config.program_name = "two words".to_string();
        assert!(config.validate().is_err());
        config.program_name = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn audio_config_rejects_tiny_ring() {
        let config = AudioConfig {
            mic_ring_samples: 100,
            ..AudioConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
