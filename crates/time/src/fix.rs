//! Fix-decoder interface.
//!
//! Sentence parsing happens elsewhere; the engine only polls a [`FixSource`]
//! once per pulse for the latest resolved time/date/location.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc};

/// A resolved time/date/location solution as reported by the receiver.
///
/// `time` is the second the receiver last reported, which is the second
/// that *preceded* the most recent pulse edge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixSnapshot {
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub latitude: f64,
    pub longitude: f64,
}

impl FixSnapshot {
    pub fn new(date: NaiveDate, time: NaiveTime, latitude: f64, longitude: f64) -> Self {
        Self {
            date,
            time: time.with_nanosecond(0).unwrap_or(time),
            latitude,
            longitude,
        }
    }

    pub fn year(&self) -> i32 {
        self.date.year()
    }

    pub fn month(&self) -> u32 {
        self.date.month()
    }

    pub fn day(&self) -> u32 {
        self.date.day()
    }

    pub fn hour(&self) -> u32 {
        self.time.hour()
    }

    pub fn minute(&self) -> u32 {
        self.time.minute()
    }

    pub fn second(&self) -> u32 {
        self.time.second()
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    /// UTC instant exactly as reported.
    pub fn reported_utc(&self) -> DateTime<Utc> {
        NaiveDateTime::new(self.date, self.time).and_utc()
    }

    /// UTC instant of the pulse edge: one second after the reported time,
    /// rolling the date over at midnight.
    pub fn utc_at_pulse(&self) -> DateTime<Utc> {
        self.reported_utc() + Duration::seconds(1)
    }
}

/// Passive source of fix data, polled by the engine.
pub trait FixSource: Send + Sync {
    /// Latest valid fix, or `None` while no time/date/location solution exists.
    fn snapshot(&self) -> Option<FixSnapshot>;
}

impl<T: FixSource + ?Sized> FixSource for std::sync::Arc<T> {
    fn snapshot(&self) -> Option<FixSnapshot> {
        (**self).snapshot()
    }
}
