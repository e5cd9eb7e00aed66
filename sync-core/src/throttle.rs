//! Minimum spacing between sync passes.
//!
//! Time is passed in; the caller sleeps for whatever [`Throttle::reserve`]
//! returns.

use std::time::{Duration, Instant};

/// Default minimum gap between two sync passes.
pub const DEFAULT_MIN_SPACING: Duration = Duration::from_millis(100);

/// Hands out start slots at least `min_spacing` apart.
#[derive(Debug, Clone)]
pub struct Throttle {
    min_spacing: Duration,
    last: Option<Instant>,
}

impl Throttle {
    /// Create a throttle with the given spacing.
    pub fn new(min_spacing: Duration) -> Self {
        Self {
            min_spacing,
            last: None,
        }
    }

    /// Reserve the next slot at or after `now` and return how long the caller
    /// must wait before starting.
    ///
    /// Back-to-back reservations queue up: the third of three calls at the
    /// same instant waits two spacings.
    pub fn reserve(&mut self, now: Instant) -> Duration {
        let start = match self.last {
            Some(last) => (last + self.min_spacing).max(now),
            None => now,
        };
        self.last = Some(start);
        start - now
    }

    /// Configured spacing.
    pub fn min_spacing(&self) -> Duration {
        self.min_spacing
    }
}

impl Default for Throttle {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_SPACING)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPACING: Duration = Duration::from_millis(100);

    #[test]
    fn first_reservation_is_immediate() {
        let mut throttle = Throttle::new(SPACING);
        assert_eq!(throttle.reserve(Instant::now()), Duration::ZERO);
    }

    #[test]
    fn back_to_back_reservations_are_spaced() {
        let mut throttle = Throttle::new(SPACING);
        let now = Instant::now();

        assert_eq!(throttle.reserve(now), Duration::ZERO);
        assert_eq!(throttle.reserve(now), SPACING);
        assert_eq!(throttle.reserve(now), SPACING * 2);
    }

    #[test]
    fn elapsed_time_counts_toward_spacing() {
        let mut throttle = Throttle::new(SPACING);
        let now = Instant::now();

        throttle.reserve(now);
        let wait = throttle.reserve(now + Duration::from_millis(40));
        assert_eq!(wait, Duration::from_millis(60));
    }

    #[test]
    fn no_wait_after_long_idle() {
        let mut throttle = Throttle::new(SPACING);
        let now = Instant::now();

        throttle.reserve(now);
        assert_eq!(throttle.reserve(now + Duration::from_secs(5)), Duration::ZERO);
    }
}
