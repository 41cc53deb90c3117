//! Reference Time Store.
//!
//! Holds the latest authoritative `(UTC instant, monotonic reading)` pair.
//! Updates come in two phases: the pulse edge stages a monotonic reading
//! ([`ReferenceTimeStore::try_capture`]) and the engine later pairs it with the
//! UTC instant of that edge ([`ReferenceTimeStore::try_publish`]). Readers only
//! ever see the published pair, and every entry point uses `try_lock` so the
//! pulse path can never stall behind a reader.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::time::Instant;

/// Mapping from monotonic ticks to calendar time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceAnchor {
    pub utc_at_anchor: DateTime<Utc>,
    pub monotonic_at_anchor: Instant,
}

impl ReferenceAnchor {
    /// UTC instant corresponding to `now` on the monotonic clock.
    pub fn utc_at(&self, now: Instant) -> DateTime<Utc> {
        let elapsed = now.saturating_duration_since(self.monotonic_at_anchor);
        match chrono::Duration::from_std(elapsed) {
            Ok(elapsed) => self.utc_at_anchor + elapsed,
            Err(_) => self.utc_at_anchor,
        }
    }
}

/// Result of a reader's non-blocking snapshot attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Snapshot {
    Ready(ReferenceAnchor),
    /// An edge was captured but not finalized yet.
    Pending,
    /// Nothing has been published.
    Empty,
    /// The lock was held; try again next cycle.
    Contended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Published(ReferenceAnchor),
    /// The edge for this second was dropped; the previous anchor stays.
    NothingCaptured,
    Contended,
}

#[derive(Debug, Default)]
struct StoreState {
    published: Option<ReferenceAnchor>,
    captured: Option<Instant>,
    pending: bool,
}

#[derive(Debug, Default)]
pub struct ReferenceTimeStore {
    state: Mutex<StoreState>,
}

impl ReferenceTimeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage the monotonic reading of a pulse edge. Interrupt-safe: a single
    /// lock attempt, no allocation. Returns `false` if the lock was contended
    /// and the edge was skipped.
    pub fn try_capture(&self, monotonic: Instant) -> bool {
        let Some(mut state) = self.state.try_lock() else {
            return false;
        };
        state.captured = Some(monotonic);
        state.pending = true;
        true
    }

    /// Pair the staged reading with the UTC instant of its edge and make the
    /// result visible to readers, clearing the pending flag.
    pub fn try_publish(&self, utc: DateTime<Utc>) -> PublishOutcome {
        let Some(mut state) = self.state.try_lock() else {
            return PublishOutcome::Contended;
        };
        let Some(monotonic) = state.captured.take() else {
            return PublishOutcome::NothingCaptured;
        };
        let anchor = ReferenceAnchor {
            utc_at_anchor: utc,
            monotonic_at_anchor: monotonic,
        };
        state.published = Some(anchor);
        state.pending = false;
        PublishOutcome::Published(anchor)
    }

    /// Replace the anchor in one step. Returns `false` when contended.
    pub fn try_set(&self, utc: DateTime<Utc>, monotonic: Instant) -> bool {
        let Some(mut state) = self.state.try_lock() else {
            return false;
        };
        state.published = Some(ReferenceAnchor {
            utc_at_anchor: utc,
            monotonic_at_anchor: monotonic,
        });
        state.captured = None;
        state.pending = false;
        true
    }

    /// Latest published anchor, ignoring the pending flag. `None` when empty
    /// or contended.
    pub fn try_get(&self) -> Option<ReferenceAnchor> {
        self.state.try_lock().and_then(|state| state.published)
    }

    pub fn snapshot(&self) -> Snapshot {
        let Some(state) = self.state.try_lock() else {
            return Snapshot::Contended;
        };
        if state.pending {
            return Snapshot::Pending;
        }
        match state.published {
            Some(anchor) => Snapshot::Ready(anchor),
            None => Snapshot::Empty,
        }
    }

    /// Whether an edge has been captured but not finalized. Contention reads
    /// as pending.
    pub fn is_pending(&self) -> bool {
        self.state.try_lock().map_or(true, |state| state.pending)
    }

    #[cfg(test)]
    pub(crate) fn hold_lock(&self) -> parking_lot::MutexGuard<'_, impl Sized> {
        self.state.lock()
    }
}
