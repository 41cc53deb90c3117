//! Retry pacing for timezone lookups.

use std::time::Duration;

/// Exponential retry schedule.
///
/// Starts at zero, grows as `2 * current + increment` on every failure and
/// is capped at `max_delay`. After `k` consecutive failures the delay is
/// `min(max_delay, (2^k - 1) * increment)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffState {
    current_delay: Duration,
    increment: Duration,
    max_delay: Duration,
}

impl BackoffState {
    pub fn new(increment: Duration, max_delay: Duration) -> Self {
        Self {
            current_delay: Duration::ZERO,
            increment,
            max_delay,
        }
    }

    /// Delay to sleep before the next lookup.
    pub fn current_delay(&self) -> Duration {
        self.current_delay
    }

    pub fn increment(&self) -> Duration {
        self.increment
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Grow the delay after a failed lookup and return the new value.
    pub fn record_failure(&mut self) -> Duration {
        let grown = self
            .current_delay
            .saturating_mul(2)
            .saturating_add(self.increment);
        self.current_delay = grown.min(self.max_delay);
        self.current_delay
    }

    /// Reset after a successful lookup.
    pub fn record_success(&mut self) {
        self.current_delay = Duration::ZERO;
    }
}

impl Default for BackoffState {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_secs(300))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_zero() {
        let backoff = BackoffState::default();
        assert_eq!(backoff.current_delay(), Duration::ZERO);
    }

    #[test]
    fn grows_then_caps() {
        let mut backoff = BackoffState::new(Duration::from_secs(1), Duration::from_secs(10));
        let delays: Vec<u64> = (0..5).map(|_| backoff.record_failure().as_secs()).collect();
        assert_eq!(delays, vec![1, 3, 7, 10, 10]);
    }

    #[test]
    fn success_resets() {
        let mut backoff = BackoffState::new(Duration::from_secs(2), Duration::from_secs(60));
        backoff.record_failure();
        backoff.record_failure();
        backoff.record_success();
        assert_eq!(backoff.current_delay(), Duration::ZERO);
        assert_eq!(backoff.record_failure(), Duration::from_secs(2));
    }

    #[test]
    fn huge_values_saturate_at_cap() {
        let mut backoff = BackoffState::new(Duration::MAX, Duration::from_secs(30));
        assert_eq!(backoff.record_failure(), Duration::from_secs(30));
        assert_eq!(backoff.record_failure(), Duration::from_secs(30));
    }
}
