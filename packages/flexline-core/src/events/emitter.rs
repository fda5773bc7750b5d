//! Event emitter abstraction for decoupling subsystems from transport.
//!
//! Subsystems depend on the [`EventEmitter`] trait rather than concrete
//! broadcast channels, enabling testing and alternative transports.

use crate::error::ErrorLogEntry;

use super::{
    AudioEvent, ConnectionEvent, DiscoveryEvent, EqEvent, SliceEvent, TransmitEvent,
};

/// Trait for emitting domain events without knowledge of transport.
///
/// The controller and pipelines use this trait to emit events, decoupling
/// them from how events reach observers (broadcast channel, GUI frontend,
/// test recorder).
pub trait EventEmitter: Send + Sync {
    /// Emits a control-session lifecycle event.
    fn emit_connection(&self, event: ConnectionEvent);

    /// Emits a slice state event.
    fn emit_slice(&self, event: SliceEvent);

    /// Emits an equalizer state event.
    fn emit_eq(&self, event: EqEvent);

    /// Emits a radio inventory event.
    fn emit_discovery(&self, event: DiscoveryEvent);

    /// Emits a DAX audio lifecycle or statistics event.
    fn emit_audio(&self, event: AudioEvent);

    /// Emits a transmit (PTT) state event.
    fn emit_transmit(&self, event: TransmitEvent);

    /// Emits a captured user-visible failure.
    fn emit_error(&self, entry: ErrorLogEntry);
}

/// No-op emitter for tests and inert pipelines.
pub struct NoopEventEmitter;

impl EventEmitter for NoopEventEmitter {
    fn emit_connection(&self, _event: ConnectionEvent) {}
    fn emit_slice(&self, _event: SliceEvent) {}
    fn emit_eq(&self, _event: EqEvent) {}
    fn emit_discovery(&self, _event: DiscoveryEvent) {}
    fn emit_audio(&self, _event: AudioEvent) {}
    fn emit_transmit(&self, _event: TransmitEvent) {}
    fn emit_error(&self, _entry: ErrorLogEntry) {}
}

/// Logging emitter for debugging and development.
///
/// Logs all events at debug level. Useful for tracing event flow without
/// wiring up a subscriber.
pub struct LoggingEventEmitter;

impl EventEmitter for LoggingEventEmitter {
    fn emit_connection(&self, event: ConnectionEvent) {
        tracing::debug!(?event, "connection_event");
    }

    fn emit_slice(&self, event: SliceEvent) {
        tracing::debug!(?event, "slice_event");
    }

    fn emit_eq(&self, event: EqEvent) {
        tracing::debug!(?event, "eq_event");
    }

    fn emit_discovery(&self, event: DiscoveryEvent) {
        tracing::debug!(?event, "discovery_event");
    }

    fn emit_audio(&self, event: AudioEvent) {
        tracing::debug!(?event, "audio_event");
    }

    fn emit_transmit(&self, event: TransmitEvent) {
        tracing::debug!(?event, "transmit_event");
    }

    fn emit_error(&self, entry: ErrorLogEntry) {
        tracing::debug!(?entry, "error_event");
    }
}
