//! Reconnect delay state for the receive loop.

use std::time::Duration;

/// Exponential reconnect delay with a floor and a ceiling.
///
/// Each failure yields the current delay and doubles it for the next one,
/// capped at the ceiling. A successful link creation resets it to the floor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    floor: Duration,
    ceiling: Duration,
    current: Duration,
}

impl Backoff {
    /// A ceiling below the floor is raised to the floor.
    #[must_use]
    pub fn new(floor: Duration, ceiling: Duration) -> Self {
        let ceiling = ceiling.max(floor);
        Self {
            floor,
            ceiling,
            current: floor,
        }
    }

    /// Delay to wait after the failure that just happened.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.ceiling);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.floor;
    }

    #[must_use]
    pub fn current(&self) -> Duration {
        self.current
    }

    #[must_use]
    pub fn floor(&self) -> Duration {
        self.floor
    }

    #[must_use]
    pub fn ceiling(&self) -> Duration {
        self.ceiling
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(10))
    }
}

#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    fn secs(delays: &[u64]) -> Vec<Duration> {
        delays.iter().copied().map(Duration::from_secs).collect()
    }

    #[test]
    fn doubles_until_ceiling_then_holds() {
        let mut backoff = Backoff::default();
        let delays: Vec<_> = (0..8).map(|_| backoff.next_delay()).collect();
        assert_eq!(delays, secs(&[1, 2, 4, 8, 10, 10, 10, 10]));
    }

    #[test]
    fn reset_returns_to_floor() {
        let mut backoff = Backoff::default();
        for _ in 0..5 {
            backoff.next_delay();
        }
        assert_eq!(backoff.current(), Duration::from_secs(10));

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_secs(2));
    }

    #[test]
    fn delay_never_decreases_within_a_streak() {
        let mut backoff = Backoff::new(Duration::from_millis(150), Duration::from_secs(7));
        let mut previous = Duration::ZERO;
        for _ in 0..20 {
            let delay = backoff.next_delay();
            assert!(delay >= previous, "{delay:?} < {previous:?}");
            assert!(delay <= backoff.ceiling());
            previous = delay;
        }
    }

    #[rstest]
    #[case(1_000, 10_000, &[1_000, 2_000, 4_000, 8_000, 10_000])]
    #[case(500, 1_500, &[500, 1_000, 1_500, 1_500, 1_500])]
    #[case(2_000, 2_000, &[2_000, 2_000, 2_000, 2_000, 2_000])]
    #[case(3_000, 1_000, &[3_000, 3_000, 3_000, 3_000, 3_000])]
    fn sequence_for_floor_and_ceiling(
        #[case] floor_ms: u64,
        #[case] ceiling_ms: u64,
        #[case] expected_ms: &[u64],
    ) {
        let mut backoff = Backoff::new(
            Duration::from_millis(floor_ms),
            Duration::from_millis(ceiling_ms),
        );
        let delays: Vec<_> = expected_ms.iter().map(|_| backoff.next_delay()).collect();
        let expected: Vec<_> = expected_ms
            .iter()
            .copied()
            .map(Duration::from_millis)
            .collect();
        assert_eq!(delays, expected);
    }
}
