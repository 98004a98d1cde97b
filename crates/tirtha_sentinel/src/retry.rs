//! Queue-level retry policy.
//!
//! Business code never retries on its own; it returns an error and the
//! dispatcher consults this policy with the task's attempt count.

use std::time::Duration;
use tirtha_protocol::RetryConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

/// What to do with a task whose handler failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Requeue with `eta = now + delay`.
    Retry { delay: Duration },
    /// Mark the task failed.
    GiveUp,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_secs(config.base_delay_secs),
            multiplier: if config.multiplier.is_finite() && config.multiplier >= 1.0 {
                config.multiplier
            } else {
                1.0
            },
            max_delay: Duration::from_secs(config.max_delay_secs),
        }
    }

    /// No automatic retries at all.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// `attempts` counts deliveries so far, including the one that failed.
    /// A task's own `max_attempts` caps the policy when it is lower.
    pub fn decide(&self, attempts: u32, task_max_attempts: u32, retryable: bool) -> RetryDecision {
        let limit = if task_max_attempts == 0 {
            self.max_attempts
        } else {
            self.max_attempts.min(task_max_attempts)
        };
        if !retryable || attempts >= limit {
            return RetryDecision::GiveUp;
        }
        RetryDecision::Retry {
            delay: self.delay_for(attempts),
        }
    }

    /// Delay before delivery number `attempt + 1`:
    /// `base * multiplier^(attempt-1)`, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = secs.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_secs(60),
            multiplier: 2.0,
            max_delay: Duration::from_secs(300),
        }
    }

    #[test]
    fn default_policy_never_retries() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.decide(1, 3, true), RetryDecision::GiveUp);
    }

    #[test]
    fn non_retryable_errors_give_up_immediately() {
        assert_eq!(policy(5).decide(1, 5, false), RetryDecision::GiveUp);
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = policy(10);
        assert_eq!(policy.delay_for(1), Duration::from_secs(60));
        assert_eq!(policy.delay_for(2), Duration::from_secs(120));
        assert_eq!(policy.delay_for(3), Duration::from_secs(240));
        assert_eq!(policy.delay_for(4), Duration::from_secs(300));
    }

    #[test]
    fn task_limit_caps_policy() {
        let policy = policy(5);
        assert_eq!(
            policy.decide(1, 2, true),
            RetryDecision::Retry {
                delay: Duration::from_secs(60)
            }
        );
        assert_eq!(policy.decide(2, 2, true), RetryDecision::GiveUp);
    }

    #[test]
    fn bad_multiplier_is_flattened() {
        let policy = RetryPolicy::from_config(&RetryConfig {
            max_attempts: 3,
            base_delay_secs: 10,
            multiplier: f64::NAN,
            max_delay_secs: 100,
        });
        assert_eq!(policy.delay_for(3), Duration::from_secs(10));
    }
}
