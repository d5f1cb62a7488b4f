//! Exponential backoff for reconnection after a dropped or failed connection.
//!
//! The delay doubles on every recorded failure and is capped at a ceiling:
//!
//! ```text
//! delay[n] = min(initial * multiplier^n, max_delay)
//! ```
//!
//! With the defaults (initial = 1s, multiplier = 2, max = 32s):
//! - after 1 failure: 2s
//! - after 2 failures: 4s
//! - ...
//! - after 5+ failures: 32s (capped)
//!
//! The schedule never exhausts; it keeps retrying at the ceiling. Every wait
//! adds independent random jitter.
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//! use llapbridge_mqtt::Backoff;
//!
//! let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(32), 2.0)
//!     .with_jitter(Duration::ZERO);
//!
//! backoff.record_failure();
//! backoff.record_failure();
//! assert_eq!(backoff.current_delay(), Duration::from_secs(4));
//!
//! backoff.reset();
//! assert_eq!(backoff.next_sleep(), Duration::from_secs(1));
//! ```

use std::time::Duration;

use rand::Rng;

/// Exponential backoff controller.
///
/// Not synchronised on its own; the owning session keeps it behind a mutex.
#[derive(Debug, Clone)]
pub struct Backoff {
    /// Delay used right after construction or a reset.
    initial_delay: Duration,

    /// Delay the next wait will use, before jitter.
    current_delay: Duration,

    /// Ceiling for `current_delay`.
    max_delay: Duration,

    /// Growth factor applied on each recorded failure.
    multiplier: f64,

    /// Upper bound of the random jitter added to each wait.
    max_jitter: Duration,

    /// Consecutive failures since the last reset.
    attempt: u32,
}

impl Backoff {
    /// Creates a backoff controller with the given timing parameters.
    ///
    /// A `multiplier` at or below 1.0 leaves the delay constant at `initial`.
    /// Jitter defaults to one second; see [`Backoff::with_jitter`].
    pub fn new(initial: Duration, max: Duration, multiplier: f64) -> Self {
        Self {
            initial_delay: initial,
            current_delay: initial,
            max_delay: max.max(initial),
            multiplier,
            max_jitter: Duration::from_millis(1000),
            attempt: 0,
        }
    }

    /// Sets the upper bound of the random jitter added by [`Backoff::next_sleep`].
    pub fn with_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    /// Returns to the initial delay. Called when a connection succeeds.
    pub fn reset(&mut self) {
        self.current_delay = self.initial_delay;
        self.attempt = 0;
    }

    /// Records a close/error event and grows the delay, capped at the ceiling.
    pub fn record_failure(&mut self) {
        self.attempt = self.attempt.saturating_add(1);

        if self.multiplier <= 1.0 {
            return;
        }

        let next_delay_secs = self.current_delay.as_secs_f64() * self.multiplier;
        self.current_delay = if next_delay_secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(next_delay_secs)
        };
    }

    /// Returns how long to wait before the next attempt: the current delay
    /// plus a fresh random jitter in `[0, max_jitter]`.
    ///
    /// Does not advance the schedule; only [`Backoff::record_failure`] does.
    pub fn next_sleep(&self) -> Duration {
        let jitter_ms = self.max_jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return self.current_delay;
        }
        let jitter = rand::thread_rng().gen_range(0..=jitter_ms);
        self.current_delay + Duration::from_millis(jitter)
    }

    /// Gets the configured initial delay.
    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    /// Gets the configured maximum delay.
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Gets the delay the next wait will use, before jitter.
    pub fn current_delay(&self) -> Duration {
        self.current_delay
    }

    /// Consecutive failures since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl Default for Backoff {
    /// 1s initial delay, doubling, capped at 32s, up to 1s jitter.
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(32), 2.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> Backoff {
        Backoff::default().with_jitter(Duration::ZERO)
    }

    #[test]
    fn test_backoff_default_creation() {
        let backoff = Backoff::default();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.current_delay(), Duration::from_secs(1));
        assert_eq!(backoff.max_delay(), Duration::from_secs(32));
    }

    #[test]
    fn test_backoff_doubles_per_failure() {
        for n in 0..10u32 {
            let mut backoff = no_jitter();
            for _ in 0..n {
                backoff.record_failure();
            }
            let expected = Duration::from_secs((1u64 << n).min(32));
            assert_eq!(backoff.current_delay(), expected, "after {n} failures");
            assert_eq!(backoff.attempt(), n);
        }
    }

    #[test]
    fn test_backoff_stays_at_ceiling() {
        let mut backoff = no_jitter();
        for _ in 0..1000 {
            backoff.record_failure();
        }
        assert_eq!(backoff.next_sleep(), Duration::from_secs(32));
    }

    #[test]
    fn test_backoff_reset() {
        let mut backoff = no_jitter();
        backoff.record_failure();
        backoff.record_failure();
        assert_eq!(backoff.attempt(), 2);

        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.current_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_backoff_jitter_is_bounded() {
        let backoff = Backoff::default().with_jitter(Duration::from_millis(250));
        for _ in 0..200 {
            let sleep = backoff.next_sleep();
            assert!(sleep >= Duration::from_secs(1));
            assert!(sleep <= Duration::from_millis(1250));
        }
    }

    #[test]
    fn test_next_sleep_does_not_advance() {
        let backoff = no_jitter();
        assert_eq!(backoff.next_sleep(), backoff.next_sleep());
        assert_eq!(backoff.attempt(), 0);
    }

    #[test]
    fn test_backoff_edge_case_invalid_multiplier() {
        let mut backoff =
            Backoff::new(Duration::from_secs(3), Duration::from_secs(10), 0.9).with_jitter(Duration::ZERO);
        backoff.record_failure();
        assert_eq!(backoff.current_delay(), Duration::from_secs(3));
    }

    #[test]
    fn test_backoff_edge_case_max_below_initial() {
        let mut backoff =
            Backoff::new(Duration::from_secs(10), Duration::from_secs(5), 2.0).with_jitter(Duration::ZERO);
        assert_eq!(backoff.max_delay(), Duration::from_secs(10));
        backoff.record_failure();
        assert_eq!(backoff.current_delay(), Duration::from_secs(10));
    }
}
