//! # Backoff
//!
//! Two retry schedules:
//!
//! - [`FibonacciBackoff`] paces requeues of Services whose reconciliation
//!   failed. Calculated in minutes: 1m, 1m, 2m, 3m, 5m, 8m, 10m (max).
//! - [`ExponentialBackoff`] paces polling of Compute long-running operations.
//!   Intervals grow geometrically with random jitter, are capped, and the
//!   whole schedule ends once an elapsed-time ceiling is reached.
//!
//! ## Usage
//!
//! ```rust
//! use autoneg_controller::controller::backoff::FibonacciBackoff;
//!
//! let mut backoff = FibonacciBackoff::new(1, 10); // 1 minute min, 10 minutes max
//! assert_eq!(backoff.next_backoff_seconds(), 60);  // 1m = 60s
//! assert_eq!(backoff.next_backoff_seconds(), 60);  // 1m = 60s
//! assert_eq!(backoff.next_backoff_seconds(), 120); // 2m = 120s
//! ```

use rand::Rng;
use std::time::Duration;

/// Fibonacci backoff calculator
///
/// Each backoff is the sum of the previous two, capped at `max_minutes`.
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    prev_minutes: u64,
    current_minutes: u64,
    max_minutes: u64,
}

impl FibonacciBackoff {
    /// Create a new Fibonacci backoff with minimum and maximum values in minutes
    ///
    /// # Example
    ///
    /// ```
    /// use autoneg_controller::controller::backoff::FibonacciBackoff;
    ///
    /// let backoff = FibonacciBackoff::new(1, 10);
    /// ```
    #[must_use]
    pub fn new(min_minutes: u64, max_minutes: u64) -> Self {
        Self {
            prev_minutes: 0,
            current_minutes: min_minutes,
            max_minutes,
        }
    }

    /// Get the next backoff duration in seconds and advance the sequence
    pub fn next_backoff_seconds(&mut self) -> u64 {
        let result_seconds = self.current_minutes * 60;
        let next_minutes = self.prev_minutes + self.current_minutes;
        self.prev_minutes = self.current_minutes;
        self.current_minutes = std::cmp::min(next_minutes, self.max_minutes);
        result_seconds
    }

    /// Get the next backoff duration as a `Duration` and advance the sequence
    #[must_use]
    pub fn next_backoff(&mut self) -> Duration {
        Duration::from_secs(self.next_backoff_seconds())
    }
}

/// Exponential backoff with jitter and an elapsed-time ceiling
///
/// The caller tracks elapsed time; [`ExponentialBackoff::next_backoff`]
/// returns `None` once the next wait would cross the ceiling.
///
/// ```
/// use autoneg_controller::controller::backoff::ExponentialBackoff;
/// use std::time::Duration;
///
/// let mut backoff = ExponentialBackoff::new(
///     Duration::from_millis(500),
///     1.5,
///     0.0,
///     Duration::from_secs(60),
///     Duration::from_secs(240),
/// );
/// assert_eq!(backoff.next_backoff(Duration::ZERO), Some(Duration::from_millis(500)));
/// assert_eq!(backoff.next_backoff(Duration::ZERO), Some(Duration::from_millis(750)));
/// assert_eq!(backoff.next_backoff(Duration::from_secs(240)), None);
/// ```
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    current: Duration,
    multiplier: f64,
    randomization: f64,
    max_interval: Duration,
    max_elapsed: Duration,
}

impl ExponentialBackoff {
    #[must_use]
    pub fn new(
        initial: Duration,
        multiplier: f64,
        randomization: f64,
        max_interval: Duration,
        max_elapsed: Duration,
    ) -> Self {
        Self {
            current: initial,
            multiplier,
            randomization: randomization.clamp(0.0, 1.0),
            max_interval,
            max_elapsed,
        }
    }

    /// Next wait, given the time already spent, or `None` when exhausted
    pub fn next_backoff(&mut self, elapsed: Duration) -> Option<Duration> {
        if elapsed >= self.max_elapsed {
            return None;
        }
        let wait = self.jittered(self.current);
        self.current = self
            .current
            .mul_f64(self.multiplier)
            .min(self.max_interval);
        Some(wait.min(self.max_elapsed.saturating_sub(elapsed)))
    }

    fn jittered(&self, interval: Duration) -> Duration {
        if self.randomization <= 0.0 {
            return interval;
        }
        let delta = interval.as_secs_f64() * self.randomization;
        let low = interval.as_secs_f64() - delta;
        let high = interval.as_secs_f64() + delta;
        Duration::from_secs_f64(rand::rng().random_range(low..=high))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fibonacci_backoff_sequence() {
        let mut backoff = FibonacciBackoff::new(1, 10);

        // 1m, 1m, 2m, 3m, 5m, 8m, 10m (max)
        assert_eq!(backoff.next_backoff_seconds(), 60);
        assert_eq!(backoff.next_backoff_seconds(), 60);
        assert_eq!(backoff.next_backoff_seconds(), 120);
        assert_eq!(backoff.next_backoff_seconds(), 180);
        assert_eq!(backoff.next_backoff_seconds(), 300);
        assert_eq!(backoff.next_backoff_seconds(), 480);
        assert_eq!(backoff.next_backoff_seconds(), 600);
        // Next would be 13m, capped
        assert_eq!(backoff.next_backoff_seconds(), 600);
    }

    #[test]
    fn test_exponential_backoff_grows_and_caps() {
        let mut backoff = ExponentialBackoff::new(
            Duration::from_secs(1),
            2.0,
            0.0,
            Duration::from_secs(5),
            Duration::from_secs(600),
        );
        let waits: Vec<u64> = (0..5)
            .map(|_| backoff.next_backoff(Duration::ZERO).unwrap().as_secs())
            .collect();
        assert_eq!(waits, vec![1, 2, 4, 5, 5]);
    }

    #[test]
    fn test_exponential_backoff_jitter_stays_in_bounds() {
        let mut backoff = ExponentialBackoff::new(
            Duration::from_secs(10),
            1.0,
            0.5,
            Duration::from_secs(10),
            Duration::from_secs(600),
        );
        for _ in 0..100 {
            let wait = backoff.next_backoff(Duration::ZERO).unwrap();
            assert!(wait >= Duration::from_secs(5) && wait <= Duration::from_secs(15), "{wait:?}");
        }
    }

    #[test]
    fn test_exponential_backoff_respects_ceiling() {
        let mut backoff = ExponentialBackoff::new(
            Duration::from_secs(10),
            1.5,
            0.0,
            Duration::from_secs(60),
            Duration::from_secs(30),
        );
        assert_eq!(backoff.next_backoff(Duration::from_secs(25)), Some(Duration::from_secs(5)));
        assert_eq!(backoff.next_backoff(Duration::from_secs(30)), None);
    }
}
