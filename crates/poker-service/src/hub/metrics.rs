//! In-process registry counters.
//!
//! Mirrors the Prometheus gauges with atomics so tasks and tests can read
//! registry size without scraping.

use crate::observability::metrics as prom;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Why a connection left the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    /// Replaced by a newer connection for the same user.
    Duplicate,
    /// Outbound queue was full during a broadcast.
    SlowConsumer,
    /// No liveness acknowledgment within the stale threshold.
    Stale,
    /// Transport closed or failed.
    Closed,
}

impl RemovalReason {
    /// Returns the reason as a metric label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            RemovalReason::Duplicate => "duplicate",
            RemovalReason::SlowConsumer => "slow_consumer",
            RemovalReason::Stale => "stale",
            RemovalReason::Closed => "closed",
        }
    }
}

/// Shared registry counters.
#[derive(Debug, Default)]
pub struct HubMetrics {
    connections: AtomicUsize,
    rooms: AtomicUsize,
    registrations: AtomicU64,
    registration_failures: AtomicU64,
    evictions: AtomicU64,
    dropped_deliveries: AtomicU64,
}

/// Snapshot of hub metrics at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubMetricsSnapshot {
    pub connections: usize,
    pub rooms: usize,
    pub registrations: u64,
    pub registration_failures: u64,
    pub evictions: u64,
    pub dropped_deliveries: u64,
}

impl HubMetrics {
    /// Create a new shared metrics instance.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A connection entered a room's subscriber set.
    pub fn connection_added(&self) {
        let connections = self.connections.fetch_add(1, Ordering::SeqCst) + 1;
        prom::set_registry_size(connections, self.rooms());
    }

    /// A connection left a room's subscriber set.
    pub fn connection_removed(&self) {
        let previous = self
            .connections
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)))
            .unwrap_or_default();
        prom::set_registry_size(previous.saturating_sub(1), self.rooms());
    }

    /// Publish the number of rooms with a registry entry.
    pub fn set_rooms(&self, rooms: usize) {
        self.rooms.store(rooms, Ordering::SeqCst);
        prom::set_registry_size(self.connections(), rooms);
    }

    pub fn record_registered(&self) {
        self.registrations.fetch_add(1, Ordering::SeqCst);
        prom::record_registration("success");
    }

    pub fn record_registration_failed(&self, result: &'static str) {
        self.registration_failures.fetch_add(1, Ordering::SeqCst);
        prom::record_registration(result);
    }

    pub fn record_removed(&self, reason: RemovalReason) {
        if reason == RemovalReason::Duplicate {
            self.evictions.fetch_add(1, Ordering::SeqCst);
        }
        prom::record_unregistration(reason.as_str());
    }

    pub fn record_broadcast(&self, delivered: usize, dropped: usize) {
        if dropped > 0 {
            self.dropped_deliveries
                .fetch_add(dropped as u64, Ordering::SeqCst);
        }
        prom::record_broadcast(delivered, dropped);
    }

    #[must_use]
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn rooms(&self) -> usize {
        self.rooms.load(Ordering::SeqCst)
    }

    /// Get a point-in-time snapshot.
    #[must_use]
    pub fn snapshot(&self) -> HubMetricsSnapshot {
        HubMetricsSnapshot {
            connections: self.connections.load(Ordering::SeqCst),
            rooms: self.rooms.load(Ordering::SeqCst),
            registrations: self.registrations.load(Ordering::SeqCst),
            registration_failures: self.registration_failures.load(Ordering::SeqCst),
            evictions: self.evictions.load(Ordering::SeqCst),
            dropped_deliveries: self.dropped_deliveries.load(Ordering::SeqCst),
        }
    }
}
