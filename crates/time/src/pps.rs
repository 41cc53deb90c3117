//! Pulse-per-second edge handler.
//!
//! [`PpsEdge::on_edge`] is the fixed-signature entry point for the hardware
//! edge. It makes one `try_lock` attempt on the [`ReferenceTimeStore`] and
//! raises a [`PulseSignal`]; everything else it touches is atomic. It does
//! not allocate or log. A contended edge loses its anchor for that second
//! but the pulse is still signalled.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::task::AtomicWaker;
use tokio::time::Instant;

use crate::metrics::SyncMetrics;
use crate::reference::ReferenceTimeStore;

/// Binary semaphore between the edge and the engine task.
///
/// Raising is a flag store plus an [`AtomicWaker`] hand-off, so it never
/// waits on a lock the waiting task may hold. Bursts raised before the
/// engine wakes coalesce into one pulse.
#[derive(Debug, Default)]
pub struct PulseSignal {
    pending: AtomicBool,
    waker: AtomicWaker,
}

impl PulseSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.pending.store(true, Ordering::Release);
        self.waker.wake();
    }

    /// Consume a raised pulse, if any.
    pub fn take(&self) -> bool {
        self.pending.swap(false, Ordering::AcqRel)
    }

    pub fn is_raised(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Resolves once a pulse has been raised, consuming it. Dropping the
    /// future before it resolves leaves the pulse pending.
    pub fn wait(&self) -> PulseWait<'_> {
        PulseWait { signal: self }
    }
}

#[must_use = "futures do nothing unless polled"]
pub struct PulseWait<'a> {
    signal: &'a PulseSignal,
}

impl Future for PulseWait<'_> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.signal.take() {
            return Poll::Ready(());
        }
        self.signal.waker.register(cx.waker());
        // Re-check: a raise between the first check and registration would
        // otherwise wake the previous waker only.
        if self.signal.take() {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }
}

#[derive(Clone)]
pub struct PpsEdge {
    store: Arc<ReferenceTimeStore>,
    pulses: Arc<PulseSignal>,
    metrics: Arc<SyncMetrics>,
}

impl PpsEdge {
    pub fn new(
        store: Arc<ReferenceTimeStore>,
        pulses: Arc<PulseSignal>,
        metrics: Arc<SyncMetrics>,
    ) -> Self {
        Self {
            store,
            pulses,
            metrics,
        }
    }

    pub fn on_edge(&self) {
        self.on_edge_at(Instant::now());
    }

    /// Handle an edge whose monotonic timestamp was latched by the caller.
    pub fn on_edge_at(&self, monotonic: Instant) {
        let captured = self.store.try_capture(monotonic);
        self.metrics.record_edge(captured);
        self.pulses.raise();
    }
}
