//! Serial-keyed radio inventory with staleness eviction.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

use crate::events::{DiscoveryEvent, EventEmitter, RadioRemovalReason};
use crate::utils::now_millis;

use super::types::{DiscoveredRadio, RadioSource};

struct InventoryEntry {
    radio: DiscoveredRadio,
    last_seen: Instant,
}

/// The set of radios currently known to the engine.
///
/// Keyed by serial. LAN entries are evicted by [`RadioInventory::sweep_stale`]
/// when their beacon stops refreshing; broker and manual entries persist
/// until explicitly removed. Upserts never change an existing entry's
/// source tag.
pub struct RadioInventory {
    radios: DashMap<String, InventoryEntry>,
    emitter: Arc<dyn EventEmitter>,
}

impl RadioInventory {
    /// Creates an empty inventory emitting through the given emitter.
    #[must_use]
    pub fn new(emitter: Arc<dyn EventEmitter>) -> Self {
        Self {
            radios: DashMap::new(),
            emitter,
        }
    }

    /// Inserts or refreshes a radio.
    ///
    /// A fresh entry takes the radio as given. An existing entry takes the
    /// new field values but keeps its original source tag, and its
    /// staleness clock is reset.
    pub fn upsert(&self, mut radio: DiscoveredRadio) {
        let serial = radio.serial.clone();
        let mut added = false;
        match self.radios.entry(serial.clone()) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                radio.source = occupied.get().radio.source;
                *occupied.get_mut() = InventoryEntry {
                    radio,
                    last_seen: Instant::now(),
                };
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(InventoryEntry {
                    radio,
                    last_seen: Instant::now(),
                });
                added = true;
            }
        }

        if added {
            log::debug!("[Discovery] radio {} added to inventory", serial);
            self.emitter.emit_discovery(DiscoveryEvent::RadioAdded {
                serial,
                timestamp: now_millis(),
            });
        } else {
            self.emitter.emit_discovery(DiscoveryEvent::RadioUpdated {
                serial,
                timestamp: now_millis(),
            });
        }
    }

    /// Adds a manually-configured radio. Never stale-evicted.
    pub fn add_manual(&self, radio: DiscoveredRadio) {
        debug_assert_eq!(radio.source, RadioSource::Manual);
        self.upsert(radio);
    }

    /// Removes a radio by explicit request, regardless of source.
    ///
    /// Returns true if an entry was removed.
    pub fn remove(&self, serial: &str) -> bool {
        let removed = self.radios.remove(serial).is_some();
        if removed {
            self.emitter.emit_discovery(DiscoveryEvent::RadioRemoved {
                serial: serial.to_string(),
                reason: RadioRemovalReason::UserRequest,
                timestamp: now_millis(),
            });
        }
        removed
    }

    /// Evicts LAN entries whose last beacon is older than `max_age`.
    ///
    /// Broker and manual entries are exempt; they are removed only via
    /// [`RadioInventory::remove`].
    pub fn sweep_stale(&self, max_age: Duration) {
        let now = Instant::now();
        let mut evicted = Vec::new();
        self.radios.retain(|serial, entry| {
            let keep = entry.radio.source != RadioSource::Lan
                || now.duration_since(entry.last_seen) <= max_age;
            if !keep {
                evicted.push(serial.clone());
            }
            keep
        });

        for serial in evicted {
            log::debug!("[Discovery] radio {} went stale, evicting", serial);
            self.emitter.emit_discovery(DiscoveryEvent::RadioRemoved {
                serial,
                reason: RadioRemovalReason::Stale,
                timestamp: now_millis(),
            });
        }
    }

    /// Looks up a radio by serial.
    #[must_use]
    pub fn get(&self, serial: &str) -> Option<DiscoveredRadio> {
        self.radios.get(serial).map(|entry| entry.radio.clone())
    }

    /// Snapshot of all known radios, sorted by serial for stable display.
    #[must_use]
    pub fn snapshot(&self) -> Vec<DiscoveredRadio> {
        let mut radios: Vec<_> = self
            .radios
            .iter()
            .map(|entry| entry.radio.clone())
            .collect();
        radios.sort_by(|a, b| a.serial.cmp(&b.serial));
        radios
    }

    /// Number of radios currently known.
    #[must_use]
    pub fn len(&self) -> usize {
        self.radios.len()
    }

    /// Whether the inventory is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.radios.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NoopEventEmitter;

    fn inventory() -> RadioInventory {
        RadioInventory::new(Arc::new(NoopEventEmitter))
    }

    fn lan_radio(serial: &str) -> DiscoveredRadio {
        let mut radio = DiscoveredRadio::manual(serial, "192.168.1.20", 4992);
        radio.source = RadioSource::Lan;
        radio
    }

    #[tokio::test(start_paused = true)]
    async fn stale_lan_entry_evicted_after_timeout() {
        let inv = inventory();
        inv.upsert(lan_radio("ABC123"));
        assert_eq!(inv.len(), 1);

        tokio::time::advance(Duration::from_secs(6)).await;
        inv.sweep_stale(Duration::from_secs(5));
        assert!(inv.get("ABC123").is_none());

        // Any later beacon re-inserts within one packet.
        inv.upsert(lan_radio("ABC123"));
        assert!(inv.get("ABC123").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_resets_staleness_clock() {
        let inv = inventory();
        inv.upsert(lan_radio("ABC123"));

        tokio::time::advance(Duration::from_secs(4)).await;
        inv.upsert(lan_radio("ABC123"));
        tokio::time::advance(Duration::from_secs(4)).await;

        // 8s since insert but only 4s since refresh.
        inv.sweep_stale(Duration::from_secs(5));
        assert!(inv.get("ABC123").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn broker_and_manual_entries_never_stale() {
        let inv = inventory();
        let mut broker = lan_radio("BRK1");
        broker.source = RadioSource::Broker;
        inv.upsert(broker);
        inv.add_manual(DiscoveredRadio::manual("MAN1", "10.0.0.5", 4992));

        tokio::time::advance(Duration::from_secs(60)).await;
        inv.sweep_stale(Duration::from_secs(5));
        assert_eq!(inv.len(), 2);

        assert!(inv.remove("MAN1"));
        assert_eq!(inv.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn update_preserves_source_tag() {
        let inv = inventory();
        inv.add_manual(DiscoveredRadio::manual("SER1", "10.0.0.5", 4992));

        // A LAN beacon for the same serial refreshes fields but not source.
        let mut beacon = lan_radio("SER1");
        beacon.model = "FLEX-6700".to_string();
        inv.upsert(beacon);

        let entry = inv.get("SER1").unwrap();
        assert_eq!(entry.source, RadioSource::Manual);
        assert_eq!(entry.model, "FLEX-6700");
    }

    #[tokio::test]
    async fn snapshot_sorted_by_serial() {
        let inv = inventory();
        inv.upsert(lan_radio("ZZ"));
        inv.upsert(lan_radio("AA"));
        let serials: Vec<_> = inv.snapshot().into_iter().map(|r| r.serial).collect();
        assert_eq!(serials, vec!["AA", "ZZ"]);
    }
}
