//! PPSClock time library
//!
//! Disciplines a reference time-of-day against a satellite receiver's
//! pulse-per-second edge, corrects it for the local timezone resolved over
//! the network, and feeds the result to a downstream time server.
//!
//! # Features
//! - Non-blocking pulse edge path (one `try_lock`, atomics otherwise)
//! - Torn-read-free reference anchor publication
//! - One-shot timezone lookups with exponential backoff
//! - Optimistic DST toggling at zone period boundaries
//! - Cancel-then-spawn task ownership for the resolver and feed

pub mod backoff;
pub mod error;
pub mod feed;
pub mod fix;
pub mod link;
pub mod metrics;
pub mod pps;
pub mod reference;
pub mod resolver;
pub mod sync;
pub mod tz;

pub use backoff::BackoffState;
pub use error::TzLookupError;
pub use feed::{calendar_time, FeedAdapter, SharedTz, TimeService};
pub use fix::{FixSnapshot, FixSource};
pub use link::{LinkEvent, LinkFsm, LinkState, LinkTransition};
pub use metrics::{SyncMetrics, SyncMetricsSnapshot};
pub use pps::{PpsEdge, PulseSignal, PulseWait};
pub use reference::{PublishOutcome, ReferenceAnchor, ReferenceTimeStore, Snapshot};
pub use resolver::{spawn_resolver, Position, ResolverOutcome};
pub use sync::{SyncConfig, SyncEvent, SyncStatus, TimeSync, TimeSyncState};
pub use tz::{parse_lookup_response, TimezoneDbClient, TimezoneLookup, TzParameters};
