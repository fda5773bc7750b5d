//! Collaborator traits for the audio pipelines.
//!
//! Actual device I/O and DSP live outside the core; the pipelines talk to
//! them through these capabilities.

/// Destination for decoded RX audio.
///
/// Implemented by the host's playback layer. `enqueue_48k_mono` is called
/// from the RX worker thread at packet rate; implementations should hand
/// the buffer to their own queue rather than block.
pub trait AudioOutput: Send + Sync {
    /// Starts (or restarts) playback, optionally on a specific device.
    fn start(&self, device_id: Option<&str>) -> Result<(), String>;

    /// Stops playback.
    fn stop(&self);

    /// Sets output gain, 0.0 to 1.0.
    fn set_gain(&self, gain: f32);

    /// Delivers one buffer of mono samples at 48 kHz.
    fn enqueue_48k_mono(&self, samples: &[f32]);
}

/// Optional noise-reduction capability applied to RX audio before delivery.
pub trait NoiseReducer: Send + Sync {
    /// Enables or disables processing. A disabled reducer must pass
    /// samples through untouched.
    fn set_enabled(&self, enabled: bool);

    /// Processes one mono buffer in place.
    fn process(&self, samples: &mut [f32]);
}

/// The default reducer: does nothing.
pub struct PassthroughNoiseReducer;

impl NoiseReducer for PassthroughNoiseReducer {
    fn set_enabled(&self, _enabled: bool) {}

    fn process(&self, _samples: &mut [f32]) {}
}

/// Output that discards everything. For headless operation and tests
/// where decoded audio has nowhere to go.
pub struct NullAudioOutput;

impl AudioOutput for NullAudioOutput {
    fn start(&self, _device_id: Option<&str>) -> Result<(), String> {
        Ok(())
    }

    fn stop(&self) {}

    fn set_gain(&self, _gain: f32) {}

    fn enqueue_48k_mono(&self, _samples: &[f32]) {}
}
