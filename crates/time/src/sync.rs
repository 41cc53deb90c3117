//! Time-sync engine.
//!
//! [`TimeSync`] owns the link FSM, the time-sync state, the backoff schedule,
//! the shared timezone parameters, the reference store and the handles of
//! the resolver and feed tasks. Events are dispatched through one
//! `match (state, event)` table; guards are predicates over the engine and
//! actions are methods that mutate it. No transition waits on the network:
//! lookups run in a resolver task and come back as outcome events.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Utc};
use parking_lot::RwLock;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::backoff::BackoffState;
use crate::error::TzLookupError;
use crate::feed::{calendar_time, FeedAdapter, SharedTz, TimeService, DEFAULT_FEED_INTERVAL};
use crate::fix::{FixSnapshot, FixSource};
use crate::link::{LinkEvent, LinkFsm, LinkState, LinkTransition};
use crate::metrics::SyncMetrics;
use crate::pps::{PpsEdge, PulseSignal};
use crate::reference::{PublishOutcome, ReferenceAnchor, ReferenceTimeStore};
use crate::resolver::{spawn_resolver, Position, ResolverOutcome};
use crate::tz::{TimezoneLookup, TzParameters};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeSyncState {
    #[default]
    Init,
    NoTz,
    Updating,
    HaveTz,
}

impl fmt::Display for TimeSyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            TimeSyncState::Init => "init",
            TimeSyncState::NoTz => "no_tz",
            TimeSyncState::Updating => "updating",
            TimeSyncState::HaveTz => "have_tz",
        };
        f.write_str(value)
    }
}

#[derive(Debug)]
pub enum SyncEvent {
    FixAcquired,
    Pulse,
    TzResolved(TzParameters),
    TzFailed(TzLookupError),
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub backoff_increment: Duration,
    pub backoff_max: Duration,
    pub feed_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        let backoff = BackoffState::default();
        Self {
            backoff_increment: backoff.increment(),
            backoff_max: backoff.max_delay(),
            feed_interval: DEFAULT_FEED_INTERVAL,
        }
    }
}

/// Point-in-time view of the engine for status reporting and display.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncStatus {
    pub state: TimeSyncState,
    pub link: LinkState,
    pub backoff_delay: Duration,
    pub tz: TzParameters,
    pub anchor: Option<ReferenceAnchor>,
}

impl SyncStatus {
    /// Whether `tz` came from a lookup rather than the unconfirmed default.
    pub fn tz_confirmed(&self) -> bool {
        self.state == TimeSyncState::HaveTz
    }

    /// Local calendar time of the latest anchor, carrying the offset.
    pub fn local_reference(&self) -> Option<DateTime<FixedOffset>> {
        self.anchor
            .and_then(|anchor| calendar_time(anchor.utc_at_anchor, self.tz.offset))
    }
}

pub struct TimeSync<F, L, S> {
    state: TimeSyncState,
    link: LinkFsm,
    backoff: BackoffState,
    tz: SharedTz,
    store: Arc<ReferenceTimeStore>,
    pulses: Arc<PulseSignal>,
    metrics: Arc<SyncMetrics>,
    fix_source: F,
    lookup: Arc<L>,
    service: Arc<S>,
    feed_interval: Duration,
    last_fix: Option<FixSnapshot>,
    position: Option<Position>,
    resolver: Option<JoinHandle<()>>,
    feed: Option<JoinHandle<()>>,
    generation: u64,
    outcomes_tx: UnboundedSender<ResolverOutcome>,
    outcomes_rx: UnboundedReceiver<ResolverOutcome>,
    status_tx: watch::Sender<SyncStatus>,
}

impl<F, L, S> TimeSync<F, L, S>
where
    F: FixSource,
    L: TimezoneLookup,
    S: TimeService,
{
    pub fn new(config: SyncConfig, fix_source: F, lookup: Arc<L>, service: Arc<S>) -> Self {
        let backoff = BackoffState::new(config.backoff_increment, config.backoff_max);
        let (outcomes_tx, outcomes_rx) = mpsc::unbounded_channel();
        let (status_tx, _) = watch::channel(SyncStatus {
            state: TimeSyncState::Init,
            link: LinkState::Uninitialized,
            backoff_delay: backoff.current_delay(),
            tz: TzParameters::unconfirmed(),
            anchor: None,
        });
        Self {
            state: TimeSyncState::Init,
            link: LinkFsm::new(),
            backoff,
            tz: Arc::new(RwLock::new(TzParameters::unconfirmed())),
            store: Arc::new(ReferenceTimeStore::new()),
            pulses: Arc::new(PulseSignal::new()),
            metrics: Arc::new(SyncMetrics::new()),
            fix_source,
            lookup,
            service,
            feed_interval: config.feed_interval,
            last_fix: None,
            position: None,
            resolver: None,
            feed: None,
            generation: 0,
            outcomes_tx,
            outcomes_rx,
            status_tx,
        }
    }

    /// Handle for the pulse interrupt path.
    pub fn pps_edge(&self) -> PpsEdge {
        PpsEdge::new(self.store.clone(), self.pulses.clone(), self.metrics.clone())
    }

    pub fn state(&self) -> TimeSyncState {
        self.state
    }

    pub fn link_state(&self) -> LinkState {
        self.link.state()
    }

    pub fn backoff(&self) -> &BackoffState {
        &self.backoff
    }

    pub fn tz_parameters(&self) -> TzParameters {
        *self.tz.read()
    }

    pub fn store(&self) -> Arc<ReferenceTimeStore> {
        self.store.clone()
    }

    pub fn metrics(&self) -> Arc<SyncMetrics> {
        self.metrics.clone()
    }

    pub fn resolver_active(&self) -> bool {
        self.resolver
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn feed_active(&self) -> bool {
        self.feed.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    pub fn status(&self) -> SyncStatus {
        SyncStatus {
            state: self.state,
            link: self.link.state(),
            backoff_delay: self.backoff.current_delay(),
            tz: self.tz_parameters(),
            anchor: self.store.try_get(),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.status_tx.subscribe()
    }

    /// Event sink for the link driver.
    pub fn handle_link_event(&mut self, event: LinkEvent) -> Option<LinkTransition> {
        let transition = self.link.handle(event);
        match transition {
            Some(LinkTransition::Started) => info!("link started"),
            Some(LinkTransition::Connected) => info!("link connected"),
            Some(LinkTransition::Disconnected { from }) => info!(%from, "link disconnected"),
            Some(LinkTransition::AddressAssigned(Some(addr))) => info!(%addr, "link ready"),
            Some(LinkTransition::AddressAssigned(None)) => info!("link ready"),
            None => debug!(?event, state = %self.link.state(), "ignoring out-of-order link event"),
        }
        self.publish_status();
        transition
    }

    /// Process one signalled pulse: poll the fix source, raise
    /// `fix-acquired` on the first valid fix, then dispatch the pulse.
    pub fn on_pulse(&mut self) {
        let fix = self.fix_source.snapshot();
        if let Some(fix) = &fix {
            trace!(
                uncorrected = %fix.reported_utc().format("%Y-%m-%dT%H:%M:%S"),
                corrected = %fix.utc_at_pulse().format("%Y-%m-%dT%H:%M:%S"),
                "pulse"
            );
            self.position = Some(Position {
                latitude: fix.latitude(),
                longitude: fix.longitude(),
            });
        }
        self.last_fix = fix;

        if self.state == TimeSyncState::Init && self.last_fix.is_some() {
            self.dispatch(SyncEvent::FixAcquired);
        }
        self.dispatch(SyncEvent::Pulse);
    }

    /// Turn a resolver outcome into a `tz-resolved` / `tz-failed` event.
    /// Outcomes from superseded queries are dropped.
    pub fn handle_outcome(&mut self, outcome: ResolverOutcome) -> Option<TimeSyncState> {
        if outcome.generation != self.generation {
            debug!(
                generation = outcome.generation,
                current = self.generation,
                "dropping stale timezone outcome"
            );
            return None;
        }
        self.resolver = None;
        let event = match outcome.result {
            Ok(params) => SyncEvent::TzResolved(params),
            Err(err) => SyncEvent::TzFailed(err),
        };
        self.dispatch(event)
    }

    /// Wait for the in-flight resolver and handle its outcome.
    pub async fn process_next_outcome(&mut self) -> Option<TimeSyncState> {
        let outcome = self.outcomes_rx.recv().await?;
        self.handle_outcome(outcome)
    }

    /// Apply one event. Returns the resulting state when a transition fired,
    /// `None` when the event has no meaning in the current state.
    pub fn dispatch(&mut self, event: SyncEvent) -> Option<TimeSyncState> {
        use TimeSyncState::*;

        let next = match (self.state, event) {
            (Init, SyncEvent::FixAcquired) => {
                self.mark_fixed();
                NoTz
            }
            (NoTz, SyncEvent::Pulse) => {
                self.publish_anchor();
                match self.query_position() {
                    Some(position) => {
                        self.start_tz_query(position);
                        Updating
                    }
                    None => NoTz,
                }
            }
            (Updating, SyncEvent::Pulse) => {
                self.publish_anchor();
                Updating
            }
            (Updating, SyncEvent::TzResolved(params)) => {
                self.apply_tz(params);
                self.start_feed();
                HaveTz
            }
            (Updating, SyncEvent::TzFailed(err)) => {
                self.record_tz_failure(&err);
                NoTz
            }
            (HaveTz, SyncEvent::Pulse) => {
                if self.tz_expired() {
                    self.toggle_dst();
                    self.publish_anchor();
                    NoTz
                } else {
                    self.publish_anchor();
                    HaveTz
                }
            }
            (state, event) => {
                trace!(%state, ?event, "event ignored");
                return None;
            }
        };

        let previous = std::mem::replace(&mut self.state, next);
        if previous != next {
            info!(from = %previous, to = %next, "time sync transition");
        }
        self.publish_status();
        Some(next)
    }

    /// Long-lived event loop. Runs until `shutdown` resolves, then tears
    /// down the resolver and feed tasks.
    pub async fn run<Sd>(mut self, mut link_events: mpsc::Receiver<LinkEvent>, shutdown: Sd)
    where
        Sd: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let pulses = self.pulses.clone();
        let mut link_open = true;

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = pulses.wait() => self.on_pulse(),
                Some(outcome) = self.outcomes_rx.recv() => {
                    self.handle_outcome(outcome);
                }
                event = link_events.recv(), if link_open => match event {
                    Some(event) => {
                        self.handle_link_event(event);
                    }
                    None => {
                        debug!("link event source closed");
                        link_open = false;
                    }
                },
            }
        }

        info!("time sync engine stopping");
        self.stop_tasks();
    }

    // ---- guards ----

    /// Position to query with, if the link permits a query.
    fn query_position(&self) -> Option<Position> {
        if !self.link.is_ready() {
            return None;
        }
        self.position
    }

    fn tz_expired(&self) -> bool {
        match self.pulse_utc() {
            Some(utc) => self.tz.read().is_expired(utc),
            None => false,
        }
    }

    fn pulse_utc(&self) -> Option<DateTime<Utc>> {
        self.last_fix.as_ref().map(FixSnapshot::utc_at_pulse)
    }

    // ---- actions ----

    fn mark_fixed(&mut self) {
        if let Some(fix) = &self.last_fix {
            info!(
                latitude = fix.latitude(),
                longitude = fix.longitude(),
                "fix acquired"
            );
        }
    }

    fn publish_anchor(&mut self) {
        let Some(utc) = self.pulse_utc() else {
            debug!("no fix for this pulse; anchor not published");
            self.metrics.record_publish(false);
            return;
        };
        match self.store.try_publish(utc) {
            PublishOutcome::Published(anchor) => {
                trace!(utc = %anchor.utc_at_anchor, "anchor published");
                self.metrics.record_publish(true);
            }
            PublishOutcome::NothingCaptured => {
                debug!("pulse edge was not captured; keeping previous anchor");
                self.metrics.record_publish(false);
            }
            PublishOutcome::Contended => {
                debug!("reference store busy; skipping anchor publish");
                self.metrics.record_publish(false);
            }
        }
    }

    /// Cancel the feed, then spawn exactly one resolver.
    fn start_tz_query(&mut self, position: Position) {
        if let Some(feed) = self.feed.take() {
            feed.abort();
            debug!("time-service feed stopped for timezone refresh");
        }
        if let Some(previous) = self.resolver.take() {
            previous.abort();
        }

        self.generation = self.generation.wrapping_add(1);
        let delay = self.backoff.current_delay();
        info!(
            latitude = position.latitude,
            longitude = position.longitude,
            delay_secs = delay.as_secs(),
            "starting timezone query"
        );
        self.metrics.record_lookup_started();
        self.resolver = Some(spawn_resolver(
            self.lookup.clone(),
            position,
            delay,
            self.generation,
            self.outcomes_tx.clone(),
        ));
    }

    fn apply_tz(&mut self, params: TzParameters) {
        *self.tz.write() = params;
        self.backoff.record_success();
        self.metrics.record_lookup_result(true);
        info!(tz = %params, "timezone resolved");
    }

    fn record_tz_failure(&mut self, err: &TzLookupError) {
        let next_delay = self.backoff.record_failure();
        self.metrics.record_lookup_result(false);
        warn!(
            next_delay_secs = next_delay.as_secs(),
            "timezone unresolved ({err}); retrying"
        );
    }

    fn start_feed(&mut self) {
        if let Some(previous) = self.feed.take() {
            previous.abort();
        }
        let feed = FeedAdapter::new(
            self.store.clone(),
            self.tz.clone(),
            self.service.clone(),
            self.metrics.clone(),
            self.feed_interval,
        );
        self.feed = Some(feed.spawn());
        info!("time-service feed started");
    }

    fn toggle_dst(&mut self) {
        let mut tz = self.tz.write();
        if tz.toggle_dst() {
            self.metrics.record_dst_toggle();
            info!(
                offset_secs = tz.offset_seconds(),
                is_dst = tz.is_dst,
                "timezone period ended; toggled DST pending reconfirmation"
            );
        } else {
            info!("timezone period ended; reconfirming offset");
        }
    }

    fn publish_status(&self) {
        self.status_tx.send_replace(self.status());
    }
}

impl<F, L, S> TimeSync<F, L, S> {
    fn stop_tasks(&mut self) {
        if let Some(feed) = self.feed.take() {
            feed.abort();
        }
        if let Some(resolver) = self.resolver.take() {
            resolver.abort();
        }
    }
}

impl<F, L, S> Drop for TimeSync<F, L, S> {
    fn drop(&mut self) {
        self.stop_tasks();
    }
}
