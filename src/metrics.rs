//! Counters for the receive path.
//!
//! Auto-acknowledged deliveries that fail later are invisible to the broker;
//! these counters are the only place such losses show up.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct DeliveryMetrics {
    received: AtomicU64,
    decode_failures: AtomicU64,
    handled: AtomicU64,
    handler_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliverySnapshot {
    pub received: u64,
    pub decode_failures: u64,
    pub handled: u64,
    pub handler_failures: u64,
}

impl DeliveryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_handled(&self) {
        self.handled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_handler_failure(&self) {
        self.handler_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DeliverySnapshot {
        DeliverySnapshot {
            received: self.received.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            handled: self.handled.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Default)]
pub struct PersistMetrics {
    persisted: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistSnapshot {
    pub persisted: u64,
    /// Messages rolled back after a storage failure and never stored.
    pub dropped: u64,
}

impl PersistMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_persisted(&self) {
        self.persisted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PersistSnapshot {
        PersistSnapshot {
            persisted: self.persisted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshots_reflect_recorded_events() {
        let delivery = DeliveryMetrics::new();
        delivery.record_received();
        delivery.record_received();
        delivery.record_decode_failure();
        delivery.record_handled();

        assert_eq!(
            delivery.snapshot(),
            DeliverySnapshot {
                received: 2,
                decode_failures: 1,
                handled: 1,
                handler_failures: 0,
            }
        );

        let persist = PersistMetrics::new();
        persist.record_dropped();
        assert_eq!(persist.snapshot().dropped, 1);
        assert_eq!(persist.snapshot().persisted, 0);
    }
}
