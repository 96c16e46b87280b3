//! Retry policy with exponential backoff and jitter.

use std::time::Duration;

/// Backoff strategy between retries of the same request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// Same delay before every retry.
    Fixed {
        delay: Duration,
    },
    /// `base * factor^attempt`, capped at `max`, plus a uniformly random
    /// `0..=jitter` added on top.
    Exponential {
        base: Duration,
        factor: f64,
        max: Duration,
        jitter: Duration,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Exponential {
            base: Duration::from_secs(2),
            factor: 2.0,
            max: Duration::from_secs(60),
            jitter: Duration::from_secs(1),
        }
    }
}

impl Backoff {
    /// Delay before retry number `attempt` (0-based).
    pub fn delay(self, attempt: u32) -> Duration {
        match self {
            Self::Fixed { delay } => delay,
            Self::Exponential {
                base,
                factor,
                max,
                jitter,
            } => {
                let scale = factor.powi(attempt.min(i32::MAX as u32) as i32);
                let seconds = (base.as_secs_f64() * scale).min(max.as_secs_f64());
                let delay = Duration::try_from_secs_f64(seconds.max(0.0)).unwrap_or(max);

                if jitter.is_zero() {
                    delay
                } else {
                    let jitter_ms = jitter.as_millis().min(u64::MAX as u128) as u64;
                    delay.saturating_add(Duration::from_millis(fastrand::u64(0..=jitter_ms)))
                }
            }
        }
    }
}

/// Retry budget of one request.
///
/// Total attempts = `max_retries + 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub backoff: Backoff,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Backoff::default(),
        }
    }
}

impl RetryConfig {
    pub fn exponential(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    pub fn fixed(delay: Duration, max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff: Backoff::Fixed { delay },
        }
    }

    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub const fn total_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// True when a request that failed on `attempt` (0-based) may be sent again.
    pub const fn can_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.backoff.delay(attempt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_backoff() {
        let backoff = Backoff::Fixed {
            delay: Duration::from_millis(100),
        };

        assert_eq!(backoff.delay(0), Duration::from_millis(100));
        assert_eq!(backoff.delay(10), Duration::from_millis(100));
    }

    #[test]
    fn test_exponential_backoff_without_jitter() {
        let backoff = Backoff::Exponential {
            base: Duration::from_secs(2),
            factor: 2.0,
            max: Duration::from_secs(10),
            jitter: Duration::ZERO,
        };

        assert_eq!(backoff.delay(0), Duration::from_secs(2));
        assert_eq!(backoff.delay(1), Duration::from_secs(4));
        assert_eq!(backoff.delay(2), Duration::from_secs(8));
        assert_eq!(backoff.delay(3), Duration::from_secs(10)); // capped
    }

    #[test]
    fn test_jitter_is_additive_and_bounded() {
        let backoff = Backoff::default();

        for _ in 0..20 {
            for attempt in 0..4 {
                let floor = Duration::from_secs(2 * 2_u64.pow(attempt));
                let delay = backoff.delay(attempt);
                assert!(delay >= floor, "attempt={attempt}, delay={delay:?}");
                assert!(
                    delay <= floor + Duration::from_secs(1),
                    "attempt={attempt}, delay={delay:?}"
                );
            }
        }
    }

    #[test]
    fn test_retry_budget() {
        let config = RetryConfig::exponential(3);

        assert_eq!(config.total_attempts(), 4);
        assert!(config.can_retry(0));
        assert!(config.can_retry(2));
        assert!(!config.can_retry(3));
    }

    #[test]
    fn test_no_retry() {
        let config = RetryConfig::no_retry();

        assert_eq!(config.total_attempts(), 1);
        assert!(!config.can_retry(0));
    }
}
