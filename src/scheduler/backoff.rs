//! Exponential backoff with jitter.
//!
//! Each call to [`Backoff::next`] returns a longer delay than the last,
//! starting at `min` and growing by `factor` until it is capped at `max`.
//! With jitter enabled the delay is drawn uniformly between `min` and the
//! un-jittered value.

use std::time::Duration;

use rand::{RngExt, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Default minimum delay.
pub const DEFAULT_MIN: Duration = Duration::from_millis(500);

/// Default maximum delay.
pub const DEFAULT_MAX: Duration = Duration::from_secs(5);

/// Default growth factor.
pub const DEFAULT_FACTOR: f64 = 4.0;

/// Stateful delay generator.
#[derive(Debug, Clone)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    factor: f64,
    jitter: bool,
    attempt: u32,
    rng: ChaCha8Rng,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_MIN, DEFAULT_MAX, DEFAULT_FACTOR)
    }
}

impl Backoff {
    /// Creates a jittered backoff seeded from the thread RNG.
    pub fn new(min: Duration, max: Duration, factor: f64) -> Self {
        Self::with_rng(min, max, factor, ChaCha8Rng::from_rng(&mut rand::rng()))
    }

    /// Creates a default backoff with a fixed seed, for reproducible delays.
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(
            DEFAULT_MIN,
            DEFAULT_MAX,
            DEFAULT_FACTOR,
            ChaCha8Rng::seed_from_u64(seed),
        )
    }

    fn with_rng(min: Duration, max: Duration, factor: f64, rng: ChaCha8Rng) -> Self {
        Self {
            min,
            max: max.max(min),
            factor: if factor.is_finite() && factor >= 1.0 { factor } else { 1.0 },
            jitter: true,
            attempt: 0,
            rng,
        }
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Returns the number of delays handed out since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Returns the next delay and advances the attempt counter.
    pub fn next(&mut self) -> Duration {
        let min = self.min.as_secs_f64();
        let max = self.max.as_secs_f64();
        let exponent = i32::try_from(self.attempt).unwrap_or(i32::MAX);
        self.attempt = self.attempt.saturating_add(1);

        let mut delay = (min * self.factor.powi(exponent)).min(max);
        if self.jitter && delay > min {
            delay = self.rng.random_range(0.0..1.0) * (delay - min) + min;
        }

        Duration::from_secs_f64(delay.clamp(min, max))
    }

    /// Starts the sequence over from `min`.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delays_grow_until_capped() {
        let mut backoff = Backoff::seeded(1).with_jitter(false);

        assert_eq!(backoff.next(), Duration::from_millis(500));
        assert_eq!(backoff.next(), Duration::from_secs(2));
        assert_eq!(backoff.next(), Duration::from_secs(5));
        assert_eq!(backoff.next(), Duration::from_secs(5));
        assert_eq!(backoff.attempt(), 4);
    }

    #[test]
    fn test_jittered_delays_stay_in_bounds() {
        let mut backoff = Backoff::seeded(42);
        for _ in 0..100 {
            let delay = backoff.next();
            assert!(delay >= DEFAULT_MIN, "{delay:?} below min");
            assert!(delay <= DEFAULT_MAX, "{delay:?} above max");
        }
    }

    #[test]
    fn test_seeded_backoff_is_reproducible() {
        let mut a = Backoff::seeded(7);
        let mut b = Backoff::seeded(7);
        for _ in 0..5 {
            assert_eq!(a.next(), b.next());
        }
    }

    #[test]
    fn test_reset_restarts_at_min() {
        let mut backoff = Backoff::seeded(3).with_jitter(false);
        backoff.next();
        backoff.next();
        backoff.reset();

        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next(), DEFAULT_MIN);
    }

    #[test]
    fn test_many_attempts_do_not_overflow() {
        let mut backoff = Backoff::new(Duration::from_millis(1), Duration::from_millis(10), 10.0);
        for _ in 0..2000 {
            assert!(backoff.next() <= Duration::from_millis(10));
        }
    }
}
