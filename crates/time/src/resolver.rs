//! One-shot timezone resolver task.
//!
//! Each task sleeps for the current backoff delay, performs a single lookup
//! and reports one [`ResolverOutcome`] to the engine before terminating. The
//! delay lives here, in a worker task, never on the pulse path.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::TzLookupError;
use crate::tz::{TimezoneLookup, TzParameters};

/// Position the lookup is keyed by.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
}

/// Result of one resolver task. `generation` identifies the query that
/// produced it so the engine can discard stale results.
#[derive(Debug)]
pub struct ResolverOutcome {
    pub generation: u64,
    pub result: Result<TzParameters, TzLookupError>,
}

pub fn spawn_resolver<L: TimezoneLookup>(
    lookup: Arc<L>,
    position: Position,
    delay: Duration,
    generation: u64,
    outcomes: UnboundedSender<ResolverOutcome>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if !delay.is_zero() {
            debug!(delay_ms = delay.as_millis() as u64, "backing off before timezone lookup");
            tokio::time::sleep(delay).await;
        }

        let result = lookup.lookup(position.latitude, position.longitude).await;
        if let Err(err) = &result {
            warn!("timezone lookup failed: {err}");
        }

        if outcomes.send(ResolverOutcome { generation, result }).is_err() {
            debug!("engine gone; dropping timezone lookup outcome");
        }
    })
}
