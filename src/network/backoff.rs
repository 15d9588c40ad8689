//! Exponential reconnect backoff.

use std::time::Duration;

/// Doubling delay schedule with a ceiling, bounding retry storms while still
/// recovering quickly from transient drops.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    ceiling: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, ceiling: Duration) -> Self {
        Self {
            base,
            ceiling,
            attempt: 0,
        }
    }

    /// The default broker schedule: 1s doubling up to a 30s ceiling.
    pub fn broker_default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30))
    }

    /// Delay before the next attempt, and advance the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let base_ms = self.base.as_millis() as u64;
        let ceiling_ms = self.ceiling.as_millis() as u64;
        let factor = 1u64.checked_shl(self.attempt).unwrap_or(u64::MAX);
        let delay_ms = base_ms.saturating_mul(factor).min(ceiling_ms);
        self.attempt = self.attempt.saturating_add(1);
        Duration::from_millis(delay_ms)
    }

    /// Reset the schedule after a successful connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Number of delays handed out since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doubling_schedule_with_ceiling() {
        let mut backoff = Backoff::broker_default();

        let delays: Vec<u64> = (0..7).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30]);
    }

    #[test]
    fn test_reset_restores_base_delay() {
        let mut backoff = Backoff::broker_default();

        // Four failures: 1s, 2s, 4s, 8s.
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_secs(2));
        assert_eq!(backoff.next_delay(), Duration::from_secs(4));
        assert_eq!(backoff.next_delay(), Duration::from_secs(8));

        // Successful connect on the fifth attempt resets the schedule.
        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_large_attempt_counts_do_not_overflow() {
        let mut backoff = Backoff::broker_default();
        for _ in 0..100 {
            backoff.next_delay();
        }
        assert_eq!(backoff.next_delay(), Duration::from_secs(30));
    }
}
