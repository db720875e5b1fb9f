use std::time::Duration;

use rand::Rng;

/// Reconnect schedule for the push channel. Attempts are numbered from 0;
/// once `max_attempts` is reached the caller must stop retrying and surface
/// the failure instead.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fraction of the delay randomized in both directions, 0.0..=1.0.
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(750),
            max_delay: Duration::from_secs(8),
            jitter: 0.2,
        }
    }
}

impl BackoffPolicy {
    pub fn with_base(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            ..Self::default()
        }
    }

    pub fn is_exhausted(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }

    /// Deterministic doubling schedule capped at `max_delay`, without jitter.
    /// `None` once the attempt budget is spent.
    pub fn raw_delay(&self, attempt: u32) -> Option<Duration> {
        if self.is_exhausted(attempt) {
            return None;
        }
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        let delay = self
            .base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay);
        Some(delay.min(self.max_delay))
    }

    /// Schedule with jitter applied, for actual sleeping between attempts.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        let raw = self.raw_delay(attempt)?;
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 {
            return Some(raw);
        }
        let mut rng = rand::thread_rng();
        let spread = rng.gen_range(1.0 - jitter..=1.0 + jitter);
        Some(raw.mul_f64(spread))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_delay_doubles_and_caps() {
        let policy = BackoffPolicy {
            max_attempts: 6,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(3),
            jitter: 0.0,
        };
        assert_eq!(policy.raw_delay(0), Some(Duration::from_millis(500)));
        assert_eq!(policy.raw_delay(1), Some(Duration::from_secs(1)));
        assert_eq!(policy.raw_delay(2), Some(Duration::from_secs(2)));
        assert_eq!(policy.raw_delay(3), Some(Duration::from_secs(3)));
        assert_eq!(policy.raw_delay(4), Some(Duration::from_secs(3)));
    }

    #[test]
    fn budget_exhaustion_yields_none() {
        let policy = BackoffPolicy::with_base(2, Duration::from_millis(100));
        assert!(policy.raw_delay(0).is_some());
        assert!(policy.raw_delay(1).is_some());
        assert_eq!(policy.raw_delay(2), None);
        assert!(policy.is_exhausted(2));
        assert_eq!(policy.delay_for(2), None);
    }

    #[test]
    fn zero_attempts_never_retries() {
        let policy = BackoffPolicy::with_base(0, Duration::from_millis(100));
        assert_eq!(policy.raw_delay(0), None);
        assert!(policy.is_exhausted(0));
    }

    #[test]
    fn jitter_stays_within_spread() {
        let policy = BackoffPolicy {
            max_attempts: 1,
            base_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_secs(10),
            jitter: 0.2,
        };
        for _ in 0..50 {
            let delay = policy.delay_for(0).unwrap();
            assert!(delay >= Duration::from_millis(800), "{delay:?}");
            assert!(delay <= Duration::from_millis(1_200), "{delay:?}");
        }
    }
}
