//! Bridge implementation that maps domain events to broadcast transport.
//!
//! The [`BroadcastEventBridge`] lives at the boundary between the engine
//! and its observers, mapping typed domain events onto a
//! `tokio::sync::broadcast` channel. GUI frontends subscribe through
//! [`BroadcastEventBridge::stream`]; an optional external emitter can be
//! attached for platform-specific delivery.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::error::ErrorLogEntry;

use super::emitter::EventEmitter;
use super::{
    AudioEvent, ConnectionEvent, DiscoveryEvent, EqEvent, RadioEvent, SliceEvent, TransmitEvent,
};

/// Bridges domain events to a broadcast channel.
///
/// Implements [`EventEmitter`] by forwarding events to a broadcast channel
/// that observers subscribe to. Slow observers lag rather than block the
/// engine (broadcast semantics).
///
/// # Thread Safety
///
/// The bridge is `Send + Sync` and can be shared across async tasks. The
/// external emitter uses `RwLock` so it can be set after construction,
/// once the platform handle exists.
#[derive(Clone)]
pub struct BroadcastEventBridge {
    tx: broadcast::Sender<RadioEvent>,
    /// Optional external emitter for platform-specific event delivery.
    external_emitter: Arc<RwLock<Option<Arc<dyn EventEmitter>>>>,
}

impl BroadcastEventBridge {
    /// Creates a new bridge with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            external_emitter: Arc::new(RwLock::new(None)),
        }
    }

    /// Sets an external emitter for platform-specific event delivery.
    ///
    /// Events are forwarded to the external emitter first, then broadcast.
    pub fn set_external_emitter(&self, emitter: Arc<dyn EventEmitter>) {
        *self.external_emitter.write() = Some(emitter);
    }

    /// Returns a new receiver for the broadcast channel.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RadioEvent> {
        self.tx.subscribe()
    }

    /// Returns the event feed as a `Stream`, for observers that prefer
    /// stream combinators over `recv` loops.
    #[must_use]
    pub fn stream(&self) -> BroadcastStream<RadioEvent> {
        BroadcastStream::new(self.tx.subscribe())
    }

    /// Returns a reference to the broadcast sender.
    #[must_use]
    pub fn sender(&self) -> &broadcast::Sender<RadioEvent> {
        &self.tx
    }
}

/// Generates an [`EventEmitter`] method that forwards to the external
/// emitter (if set) and then sends to the broadcast channel.
macro_rules! impl_emit {
    ($method:ident, $event_ty:ty, $variant:ident) => {
        fn $method(&self, event: $event_ty) {
            if let Some(ref emitter) = *self.external_emitter.read() {
                emitter.$method(event.clone());
            }
            if let Err(e) = self.tx.send(RadioEvent::$variant(event)) {
                log::trace!("[EventBridge] No broadcast receivers: {}", e);
            }
        }
    };
}

impl EventEmitter for BroadcastEventBridge {
    impl_emit!(emit_connection, ConnectionEvent, Connection);
    impl_emit!(emit_slice, SliceEvent, Slice);
    impl_emit!(emit_eq, EqEvent, Eq);
    impl_emit!(emit_discovery, DiscoveryEvent, Discovery);
    impl_emit!(emit_audio, AudioEvent, Audio);
    impl_emit!(emit_transmit, TransmitEvent, Transmit);
    impl_emit!(emit_error, ErrorLogEntry, Error);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::ConnectionStatus;

    #[tokio::test]
    async fn bridge_forwards_to_subscribers() {
        let bridge = BroadcastEventBridge::new(8);
        let mut rx = bridge.subscribe();

        bridge.emit_connection(ConnectionEvent::StateChanged {
            status: ConnectionStatus::Connected,
            timestamp: 1,
        });

        match rx.recv().await.unwrap() {
            RadioEvent::Connection(ConnectionEvent::StateChanged { status, .. }) => {
                assert_eq!(status, ConnectionStatus::Connected);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn emit_without_subscribers_is_silent() {
        let bridge = BroadcastEventBridge::new(8);
        // No receivers; must not panic or error out.
        bridge.emit_transmit(TransmitEvent::Changed {
            active: true,
            timestamp: 0,
        });
    }
}
