//! DAX audio pipelines.
//!
//! Two independent pipelines, both inert until the control session is
//! connected and stream IDs have been negotiated:
//!
//! - [`DaxRxPipeline`]: receives VITA-49 audio over UDP, filters by stream
//!   ID, decodes (big-endian float on the LAN, Opus on the WAN), downmixes
//!   to mono, upsamples to 48 kHz where needed, and delivers to the
//!   [`AudioOutput`] collaborator.
//! - [`MicTxPipeline`]: accepts mic samples from the host's realtime
//!   thread through a lock-free ring, frames them into 480-sample packets
//!   at 24 kHz, and sends them to the radio.
//!
//! Both use dedicated blocking workers rather than the async runtime:
//! readiness-based loops interact poorly with `SO_REUSEPORT` contention on
//! some platforms, and the TX side must never touch a syscall from the
//! audio callback.

mod resample;
mod rx;
pub mod traits;
mod tx;

pub use resample::{LinearResampler, LinearUpsampler};
pub use rx::{DaxRxPipeline, RxPath};
pub use traits::{AudioOutput, NoiseReducer, NullAudioOutput, PassthroughNoiseReducer};
pub use tx::{MicFeeder, MicTxPipeline};

use thiserror::Error;

/// Errors raised by the audio pipelines.
///
/// Bind and codec-init failures surface to the controller for display
/// without killing the control session; receive errors terminate the
/// worker quietly.
#[derive(Debug, Error)]
pub enum StreamError {
    /// Could not bind the UDP socket (notably address-in-use).
    #[error("failed to bind audio socket: {0}")]
    Bind(#[source] std::io::Error),

    /// A `sendto` failed hard enough to stop the TX worker.
    #[error("failed to send audio packet: {0}")]
    Send(#[source] std::io::Error),

    /// The Opus decoder could not be created. WAN audio degrades.
    #[error("Opus decoder init failed: {0}")]
    OpusInit(String),

    /// One Opus frame failed to decode; the packet is dropped.
    #[error("Opus decode failed: {0}")]
    OpusDecode(String),

    /// An operation required a running pipeline.
    #[error("pipeline is not running")]
    NotRunning,
}

/// Convenient Result alias for pipeline operations.
pub type StreamResult<T> = Result<T, StreamError>;
