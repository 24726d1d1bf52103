//! Capped exponential backoff for reconnect loops.

use std::time::Duration;

/// Doubling delay sequence with an upper bound.
///
/// `next_delay` returns the current delay and advances; `reset` returns to
/// the initial delay after a successful attempt.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial: Duration,
    max: Duration,
    multiplier: u32,
    current: Duration,
    attempts: u32,
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            multiplier: 2,
            current: initial,
            attempts: 0,
        }
    }

    pub fn with_multiplier(mut self, multiplier: u32) -> Self {
        self.multiplier = multiplier.max(1);
        self
    }

    /// Delay to wait before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self
            .current
            .checked_mul(self.multiplier)
            .unwrap_or(self.max)
            .min(self.max);
        self.attempts = self.attempts.saturating_add(1);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
        self.attempts = 0;
    }

    /// Failed attempts since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn doubles_until_capped() {
        let mut b = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(5));
        let delays: Vec<u64> = (0..5).map(|_| b.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 5, 5]);
        assert_eq!(b.attempts(), 5);
    }

    #[test]
    fn reset_returns_to_initial() {
        let mut b = ExponentialBackoff::default();
        b.next_delay();
        b.next_delay();
        b.reset();
        assert_eq!(b.next_delay(), Duration::from_secs(1));
        assert_eq!(b.attempts(), 1);
    }

    proptest! {
        #[test]
        fn delays_never_decrease_and_never_exceed_cap(
            initial_ms in 1u64..10_000,
            max_ms in 1u64..100_000,
            steps in 1usize..64,
        ) {
            let mut b = ExponentialBackoff::new(
                Duration::from_millis(initial_ms),
                Duration::from_millis(max_ms),
            );
            let cap = Duration::from_millis(max_ms.max(initial_ms));
            let mut prev = Duration::ZERO;
            for _ in 0..steps {
                let d = b.next_delay();
                prop_assert!(d >= prev);
                prop_assert!(d <= cap);
                prev = d;
            }
        }
    }
}
