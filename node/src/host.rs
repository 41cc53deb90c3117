//! Host stand-ins for the receiver and link driver.
//!
//! On a development machine there is no pulse line, no satellite receiver
//! and no network interface driver to listen to. These types drive the
//! engine through the same interfaces from the system clock and the host's
//! primary address.

use std::net::IpAddr;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, Timelike, Utc};
use ppsclock_time::{FixSnapshot, FixSource, LinkEvent, PpsEdge, TimeService};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

pub const DEFAULT_LINK_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Fires a pulse edge on every whole second of the system clock.
pub struct SystemPulse;

impl SystemPulse {
    pub fn spawn(edge: PpsEdge) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(until_next_second(Utc::now())).await;
                edge.on_edge();
            }
        })
    }
}

fn until_next_second(now: DateTime<Utc>) -> Duration {
    let into_second = now.nanosecond() % 1_000_000_000;
    Duration::from_nanos(u64::from(1_000_000_000 - into_second))
}

/// Fix source reporting a configured position and the system clock.
#[derive(Debug, Clone, Copy)]
pub struct StaticFix {
    latitude: f64,
    longitude: f64,
}

impl StaticFix {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// The snapshot a receiver would report when polled at `now`: the last
    /// whole second before the pulse that started the current second.
    pub fn snapshot_at(&self, now: DateTime<Utc>) -> FixSnapshot {
        let reported = now - ChronoDuration::seconds(1);
        FixSnapshot::new(
            reported.date_naive(),
            reported.time(),
            self.latitude,
            self.longitude,
        )
    }
}

impl FixSource for StaticFix {
    fn snapshot(&self) -> Option<FixSnapshot> {
        Some(self.snapshot_at(Utc::now()))
    }
}

/// Watches the host's primary address and translates it into link events.
pub struct HostLinkMonitor<P> {
    hostname: String,
    poll_interval: Duration,
    probe: P,
    events: mpsc::Sender<LinkEvent>,
    address: Option<IpAddr>,
}

impl HostLinkMonitor<fn() -> Option<IpAddr>> {
    pub fn new(hostname: impl Into<String>, events: mpsc::Sender<LinkEvent>) -> Self {
        Self::with_probe(hostname, events, primary_address)
    }
}

impl<P> HostLinkMonitor<P>
where
    P: FnMut() -> Option<IpAddr> + Send + 'static,
{
    pub fn with_probe(
        hostname: impl Into<String>,
        events: mpsc::Sender<LinkEvent>,
        probe: P,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            poll_interval: DEFAULT_LINK_POLL_INTERVAL,
            probe,
            events,
            address: None,
        }
    }

    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        info!(hostname = %self.hostname, "link driver started");
        if self.events.send(LinkEvent::Start).await.is_err() {
            return;
        }

        let mut ticker = tokio::time::interval(self.poll_interval);
        loop {
            ticker.tick().await;
            let observed = (self.probe)();
            for event in self.observe(observed) {
                if self.events.send(event).await.is_err() {
                    debug!("link event sink closed, stopping monitor");
                    return;
                }
            }
        }
    }

    /// Events implied by the address moving from the last observation to
    /// `observed`.
    fn observe(&mut self, observed: Option<IpAddr>) -> Vec<LinkEvent> {
        let previous = std::mem::replace(&mut self.address, observed);
        match (previous, observed) {
            (None, Some(addr)) => vec![LinkEvent::Connected, LinkEvent::GotAddress(Some(addr))],
            (Some(_), None) => vec![LinkEvent::Disconnected],
            (Some(old), Some(new)) if old != new => vec![
                LinkEvent::Disconnected,
                LinkEvent::Connected,
                LinkEvent::GotAddress(Some(new)),
            ],
            _ => Vec::new(),
        }
    }
}

fn primary_address() -> Option<IpAddr> {
    local_ip_address::local_ip().ok()
}

/// Time service that only reports what it was handed.
#[derive(Debug, Default)]
pub struct LoggingTimeService;

impl TimeService for LoggingTimeService {
    fn set_reference_time(&self, calendar_time: DateTime<FixedOffset>, monotonic_anchor: Instant) {
        debug!(
            local = %calendar_time.format("%Y-%m-%d %H:%M:%S %:z"),
            anchor_age_ms = monotonic_anchor.elapsed().as_millis() as u64,
            "reference time pushed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::VecDeque;
    use std::net::Ipv4Addr;

    fn addr(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(192, 168, 1, last))
    }

    #[test]
    fn next_second_delay_is_within_one_second() {
        let exact = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        assert_eq!(until_next_second(exact), Duration::from_secs(1));

        let late = exact + ChronoDuration::milliseconds(750);
        assert_eq!(until_next_second(late), Duration::from_millis(250));
    }

    #[test]
    fn static_fix_reports_preceding_second() {
        let fix = StaticFix::new(40.7128, -74.006);
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
            + ChronoDuration::milliseconds(20);
        let snapshot = fix.snapshot_at(now);

        assert_eq!((snapshot.hour(), snapshot.minute(), snapshot.second()), (11, 59, 59));
        assert_eq!(snapshot.latitude(), 40.7128);
        assert_eq!(
            snapshot.utc_at_pulse(),
            Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn static_fix_crosses_midnight_backwards() {
        let fix = StaticFix::new(0.0, 0.0);
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let snapshot = fix.snapshot_at(now);
        assert_eq!((snapshot.year(), snapshot.month(), snapshot.day()), (2023, 12, 31));
        assert_eq!(snapshot.second(), 59);
    }

    #[test]
    fn monitor_translates_address_changes() {
        let (tx, _rx) = mpsc::channel(8);
        let mut monitor = HostLinkMonitor::with_probe("ppsclock", tx, || None);

        assert!(monitor.observe(None).is_empty());
        assert_eq!(
            monitor.observe(Some(addr(10))),
            vec![LinkEvent::Connected, LinkEvent::GotAddress(Some(addr(10)))]
        );
        assert!(monitor.observe(Some(addr(10))).is_empty());
        assert_eq!(
            monitor.observe(Some(addr(11))),
            vec![
                LinkEvent::Disconnected,
                LinkEvent::Connected,
                LinkEvent::GotAddress(Some(addr(11)))
            ]
        );
        assert_eq!(monitor.observe(None), vec![LinkEvent::Disconnected]);
    }

    #[tokio::test(start_paused = true)]
    async fn monitor_emits_start_then_polls() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut script: VecDeque<Option<IpAddr>> =
            VecDeque::from([None, Some(addr(7)), None]);
        let monitor = HostLinkMonitor::with_probe("ppsclock", tx, move || {
            script.pop_front().flatten()
        })
        .poll_interval(Duration::from_secs(1));
        let handle = monitor.spawn();

        assert_eq!(rx.recv().await, Some(LinkEvent::Start));
        assert_eq!(rx.recv().await, Some(LinkEvent::Connected));
        assert_eq!(rx.recv().await, Some(LinkEvent::GotAddress(Some(addr(7)))));
        assert_eq!(rx.recv().await, Some(LinkEvent::Disconnected));

        drop(rx);
        handle.abort();
    }
}
