use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Engine counters. Lock-free so the pulse edge path can update them.
#[derive(Debug, Default)]
pub struct SyncMetrics {
    pulses: AtomicU64,
    anchors_captured: AtomicU64,
    anchors_dropped: AtomicU64,
    anchors_published: AtomicU64,
    publish_skipped: AtomicU64,
    lookups_started: AtomicU64,
    lookups_succeeded: AtomicU64,
    lookups_failed: AtomicU64,
    dst_toggles: AtomicU64,
    feed_pushes: AtomicU64,
    feed_skips: AtomicU64,
}

impl SyncMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_edge(&self, captured: bool) {
        self.pulses.fetch_add(1, Ordering::Relaxed);
        if captured {
            self.anchors_captured.fetch_add(1, Ordering::Relaxed);
        } else {
            self.anchors_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_publish(&self, published: bool) {
        if published {
            self.anchors_published.fetch_add(1, Ordering::Relaxed);
        } else {
            self.publish_skipped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_lookup_started(&self) {
        self.lookups_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lookup_result(&self, success: bool) {
        if success {
            self.lookups_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.lookups_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_dst_toggle(&self) {
        self.dst_toggles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_feed(&self, pushed: bool) {
        if pushed {
            self.feed_pushes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.feed_skips.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> SyncMetricsSnapshot {
        SyncMetricsSnapshot {
            pulses: self.pulses.load(Ordering::Relaxed),
            anchors_captured: self.anchors_captured.load(Ordering::Relaxed),
            anchors_dropped: self.anchors_dropped.load(Ordering::Relaxed),
            anchors_published: self.anchors_published.load(Ordering::Relaxed),
            publish_skipped: self.publish_skipped.load(Ordering::Relaxed),
            lookups_started: self.lookups_started.load(Ordering::Relaxed),
            lookups_succeeded: self.lookups_succeeded.load(Ordering::Relaxed),
            lookups_failed: self.lookups_failed.load(Ordering::Relaxed),
            dst_toggles: self.dst_toggles.load(Ordering::Relaxed),
            feed_pushes: self.feed_pushes.load(Ordering::Relaxed),
            feed_skips: self.feed_skips.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of engine counters at a point in time
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMetricsSnapshot {
    pub pulses: u64,
    pub anchors_captured: u64,
    pub anchors_dropped: u64,
    pub anchors_published: u64,
    pub publish_skipped: u64,
    pub lookups_started: u64,
    pub lookups_succeeded: u64,
    pub lookups_failed: u64,
    pub dst_toggles: u64,
    pub feed_pushes: u64,
    pub feed_skips: u64,
}

impl SyncMetricsSnapshot {
    /// Fraction of pulse edges whose anchor was captured.
    pub fn capture_ratio(&self) -> f64 {
        if self.pulses == 0 {
            return 1.0;
        }
        self.anchors_captured as f64 / self.pulses as f64
    }
}
