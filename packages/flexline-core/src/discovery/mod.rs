//! LAN radio discovery.
//!
//! Radios broadcast a VITA-49 beacon on UDP 4992 about once a second. The
//! [`DiscoveryListener`] inhales those beacons into a [`RadioInventory`]
//! keyed by serial number; entries that stop refreshing are evicted after
//! a staleness window. Broker-sourced and manually-added radios share the
//! same inventory but are never stale-evicted.

mod inventory;
mod listener;
mod types;

pub use inventory::RadioInventory;
pub use listener::DiscoveryListener;
pub use types::{DiscoveredRadio, RadioSource};

use thiserror::Error;

/// Errors raised while starting the discovery listener.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Could not create or bind the shared discovery socket.
    #[error("failed to bind discovery socket: {0}")]
    SocketBind(#[source] std::io::Error),
}

/// Convenient Result alias for discovery operations.
pub type DiscoveryResult<T> = Result<T, DiscoveryError>;
