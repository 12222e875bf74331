//! Backoff schedule for container state polling.

use std::time::Duration;

/// Doubling poll interval, capped at `max`.
///
/// With `initial == max` this degrades to a fixed polling interval.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    max: Duration,
    current: Duration,
}

impl ExponentialBackoff {
    /// A `max` below `initial` is raised to `initial`.
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            max: max.max(initial),
            current: initial,
        }
    }

    /// Interval to sleep before the next poll.
    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn next(&mut self) {
        self.current = self.current.saturating_mul(2).min(self.max);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_schedule_never_grows() {
        let mut backoff = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(1));
        backoff.next();
        backoff.next();
        assert_eq!(backoff.current(), Duration::from_secs(1));
    }

    #[test]
    fn backoff_doubles_and_caps_at_max() {
        let mut backoff = ExponentialBackoff::new(Duration::from_millis(250), Duration::from_secs(1));
        backoff.next();
        assert_eq!(backoff.current(), Duration::from_millis(500));
        backoff.next();
        backoff.next();
        assert_eq!(backoff.current(), Duration::from_secs(1));
    }

    #[test]
    fn max_below_initial_is_raised_to_initial() {
        let mut backoff = ExponentialBackoff::new(Duration::from_secs(3), Duration::from_secs(1));
        backoff.next();
        assert_eq!(backoff.current(), Duration::from_secs(3));
    }
}
