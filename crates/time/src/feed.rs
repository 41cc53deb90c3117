//! Time-service feed.
//!
//! Once timezone parameters are known, a long-lived task pushes the current
//! reference anchor, shifted into local time, into the downstream time
//! server. It is aborted whenever a fresh timezone query starts.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Utc};
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::trace;

use crate::metrics::SyncMetrics;
use crate::reference::{ReferenceAnchor, ReferenceTimeStore, Snapshot};
use crate::tz::TzParameters;

/// Timezone parameters shared between the engine (sole writer) and the feed.
pub type SharedTz = Arc<RwLock<TzParameters>>;

pub const DEFAULT_FEED_INTERVAL: Duration = Duration::from_secs(1);

/// Downstream time-serving implementation.
pub trait TimeService: Send + Sync + 'static {
    /// Called at most once per feed interval with the local calendar time
    /// of the anchor and the monotonic reading it was taken at.
    fn set_reference_time(&self, calendar_time: DateTime<FixedOffset>, monotonic_anchor: Instant);
}

impl<T: TimeService + ?Sized> TimeService for Arc<T> {
    fn set_reference_time(&self, calendar_time: DateTime<FixedOffset>, monotonic_anchor: Instant) {
        (**self).set_reference_time(calendar_time, monotonic_anchor)
    }
}

/// `utc` expressed in the fixed zone `offset`. `None` for offsets a
/// [`FixedOffset`] cannot represent.
pub fn calendar_time(utc: DateTime<Utc>, offset: chrono::Duration) -> Option<DateTime<FixedOffset>> {
    let seconds = i32::try_from(offset.num_seconds()).ok()?;
    FixedOffset::east_opt(seconds).map(|zone| utc.with_timezone(&zone))
}

pub struct FeedAdapter<S> {
    store: Arc<ReferenceTimeStore>,
    tz: SharedTz,
    service: Arc<S>,
    metrics: Arc<SyncMetrics>,
    interval: Duration,
}

#[derive(Debug, Default)]
struct FeedCycle {
    last_anchor: Option<ReferenceAnchor>,
    last_offset: chrono::Duration,
}

impl<S: TimeService> FeedAdapter<S> {
    pub fn new(
        store: Arc<ReferenceTimeStore>,
        tz: SharedTz,
        service: Arc<S>,
        metrics: Arc<SyncMetrics>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            tz,
            service,
            metrics,
            interval,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(self) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut cycle = FeedCycle::default();
        loop {
            ticker.tick().await;
            let pushed = self.step(&mut cycle);
            self.metrics.record_feed(pushed);
        }
    }

    fn step(&self, cycle: &mut FeedCycle) -> bool {
        let anchor = match self.store.snapshot() {
            Snapshot::Ready(anchor) => anchor,
            // Serve the previous value rather than wait on the lock.
            Snapshot::Contended => match cycle.last_anchor {
                Some(anchor) => anchor,
                None => return false,
            },
            Snapshot::Pending | Snapshot::Empty => return false,
        };

        if let Some(tz) = self.tz.try_read() {
            cycle.last_offset = tz.offset;
        }

        let Some(calendar) = calendar_time(anchor.utc_at_anchor, cycle.last_offset) else {
            return false;
        };
        trace!(reference = %calendar, "feeding reference time");
        self.service
            .set_reference_time(calendar, anchor.monotonic_at_anchor);
        cycle.last_anchor = Some(anchor);
        true
    }
}
