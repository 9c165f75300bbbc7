use std::time::Duration;

use rand::Rng;

/// Backoff strategy used between claim retries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BackoffStrategy {
    Fixed,
    Exponential,
    #[default]
    ExponentialWithJitter,
}

/// How often, and how patiently, a claim is re-issued after the store
/// could not be reached. Duplicates are never retried.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub strategy: BackoffStrategy,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match self.strategy {
            BackoffStrategy::Fixed => self.base_delay.min(self.max_delay),
            BackoffStrategy::Exponential | BackoffStrategy::ExponentialWithJitter => {
                let factor = 2_u32.saturating_pow(attempt.saturating_sub(1));
                let candidate = self
                    .base_delay
                    .checked_mul(factor)
                    .unwrap_or(self.max_delay);
                let capped = self.max_delay.min(candidate);
                if self.strategy == BackoffStrategy::ExponentialWithJitter {
                    jitter(capped)
                } else {
                    capped
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            strategy: BackoffStrategy::ExponentialWithJitter,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(1),
        }
    }
}

// Full jitter: anywhere between zero and the capped delay.
fn jitter(duration: Duration) -> Duration {
    let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
    Duration::from_nanos(rand::rng().random_range(0..=nanos))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(strategy: BackoffStrategy) -> RetryPolicy {
        RetryPolicy {
            max_retries: 5,
            strategy,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
        }
    }

    #[test]
    fn exponential_doubles_until_capped() {
        let policy = policy(BackoffStrategy::Exponential);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(10));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(20));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(40));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(50));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_millis(50));
    }

    #[test]
    fn fixed_stays_put() {
        let policy = policy(BackoffStrategy::Fixed);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(10));
        assert_eq!(policy.delay_for_attempt(7), Duration::from_millis(10));
    }

    #[test]
    fn jitter_never_exceeds_the_cap() {
        let policy = policy(BackoffStrategy::ExponentialWithJitter);
        for attempt in 1..20 {
            assert!(policy.delay_for_attempt(attempt) <= Duration::from_millis(50));
        }
    }
}
