//! Retry strategies and backoff policies for floe.
//!
//! The Controller uses [`RetryStrategyConfig`] for two distinct retry loops:
//! the `latest-<env>` pointer update (§4.6 step 9, bounded exponential
//! backoff, at least 3 attempts) and the webhook notifier's per-delivery
//! retry (§4.8, `base * 2^(attempt-1)`, `retry_count + 1` total attempts).
//! Both reduce to the same `calculate_delay` arithmetic; only the presets
//! differ.
//!
//! # Example
//!
//! ```
//! use floe_retry::{calculate_delay, RetryStrategyConfig, RetryStrategyType};
//! use std::time::Duration;
//!
//! let config = RetryStrategyConfig {
//!     strategy: RetryStrategyType::Exponential,
//!     max_attempts: 3,
//!     base_delay: Duration::from_secs(1),
//!     max_delay: Duration::from_secs(30),
//!     jitter: 0.0,
//! };
//! assert_eq!(calculate_delay(&config, 1), Duration::from_secs(1));
//! assert_eq!(calculate_delay(&config, 2), Duration::from_secs(2));
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// The backoff shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategyType {
    Exponential,
    Linear,
    Constant,
}

/// Named retry presets, analogous to the Controller's per-step policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RetryPolicy {
    /// `latest-<env>` pointer update: exponential, 3 attempts minimum.
    #[default]
    LatestPointer,
    /// Webhook delivery: exponential with base 1s, attempt count from config.
    Webhook,
    /// Registry adapter transient-error retry ahead of `RegistryUnavailable`.
    RegistryTransient,
}

impl RetryPolicy {
    /// Expand a named policy into a concrete backoff configuration.
    pub fn to_config(self) -> RetryStrategyConfig {
        match self {
            RetryPolicy::LatestPointer => RetryStrategyConfig {
                strategy: RetryStrategyType::Exponential,
                max_attempts: 3,
                base_delay: Duration::from_millis(500),
                max_delay: Duration::from_secs(10),
                jitter: 0.2,
            },
            RetryPolicy::Webhook => RetryStrategyConfig {
                strategy: RetryStrategyType::Exponential,
                max_attempts: 4,
                base_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(60),
                jitter: 0.0,
            },
            RetryPolicy::RegistryTransient => RetryStrategyConfig {
                strategy: RetryStrategyType::Exponential,
                max_attempts: 5,
                base_delay: Duration::from_millis(200),
                max_delay: Duration::from_secs(5),
                jitter: 0.3,
            },
        }
    }
}

/// A concrete, fully-resolved backoff configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryStrategyConfig {
    pub strategy: RetryStrategyType,
    pub max_attempts: u32,
    #[serde(with = "duration_millis")]
    pub base_delay: Duration,
    #[serde(with = "duration_millis")]
    pub max_delay: Duration,
    pub jitter: f64,
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(d)?;
        Ok(Duration::from_millis(ms))
    }
}

/// Compute the delay before `attempt` (1-indexed), before jitter is applied
/// via [`apply_jitter`].
pub fn calculate_delay(config: &RetryStrategyConfig, attempt: u32) -> Duration {
    let raw = match config.strategy {
        RetryStrategyType::Exponential => {
            let exp = attempt.saturating_sub(1).min(16);
            config.base_delay.saturating_mul(1u32.checked_shl(exp).unwrap_or(u32::MAX))
        }
        RetryStrategyType::Linear => config.base_delay.saturating_mul(attempt.max(1)),
        RetryStrategyType::Constant => config.base_delay,
    };
    raw.min(config.max_delay)
}

/// Apply a symmetric jitter factor in `[1-jitter, 1+jitter]` to a delay.
pub fn apply_jitter(delay: Duration, jitter: f64) -> Duration {
    if jitter <= 0.0 {
        return delay;
    }
    let factor = 1.0 - jitter + rand::random::<f64>() * (2.0 * jitter);
    Duration::from_secs_f64((delay.as_secs_f64() * factor).max(0.0))
}

/// Compute the delay for `attempt` including jitter, per [`RetryStrategyConfig`].
pub fn calculate_delay_with_jitter(config: &RetryStrategyConfig, attempt: u32) -> Duration {
    apply_jitter(calculate_delay(config, attempt), config.jitter)
}

/// Total number of attempts (1 initial + `retry_count` retries), matching
/// the webhook notifier's `max_attempts = 1 + retry_count` convention.
pub fn total_attempts(retry_count: u32) -> u32 {
    retry_count + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_backoff_doubles() {
        let config = RetryStrategyConfig {
            strategy: RetryStrategyType::Exponential,
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(1000),
            jitter: 0.0,
        };
        assert_eq!(calculate_delay(&config, 1), Duration::from_secs(1));
        assert_eq!(calculate_delay(&config, 2), Duration::from_secs(2));
        assert_eq!(calculate_delay(&config, 3), Duration::from_secs(4));
        assert_eq!(calculate_delay(&config, 4), Duration::from_secs(8));
    }

    #[test]
    fn exponential_backoff_respects_max_delay() {
        let config = RetryStrategyConfig {
            strategy: RetryStrategyType::Exponential,
            max_attempts: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            jitter: 0.0,
        };
        assert_eq!(calculate_delay(&config, 10), Duration::from_secs(5));
    }

    #[test]
    fn linear_backoff_scales_with_attempt() {
        let config = RetryStrategyConfig {
            strategy: RetryStrategyType::Linear,
            max_attempts: 3,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            jitter: 0.0,
        };
        assert_eq!(calculate_delay(&config, 2), Duration::from_secs(10));
    }

    #[test]
    fn constant_backoff_is_flat() {
        let config = RetryStrategyConfig {
            strategy: RetryStrategyType::Constant,
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            jitter: 0.0,
        };
        assert_eq!(calculate_delay(&config, 1), calculate_delay(&config, 3));
    }

    #[test]
    fn webhook_total_attempts_is_retry_count_plus_one() {
        assert_eq!(total_attempts(3), 4);
        assert_eq!(total_attempts(0), 1);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let base = Duration::from_secs(10);
        for _ in 0..50 {
            let jittered = apply_jitter(base, 0.5);
            assert!(jittered.as_secs_f64() >= 5.0 - 0.01);
            assert!(jittered.as_secs_f64() <= 15.0 + 0.01);
        }
    }

    #[test]
    fn zero_jitter_is_exact() {
        let base = Duration::from_secs(10);
        assert_eq!(apply_jitter(base, 0.0), base);
    }

    #[test]
    fn retry_policy_presets_are_exponential() {
        assert_eq!(RetryPolicy::LatestPointer.to_config().strategy, RetryStrategyType::Exponential);
        assert!(RetryPolicy::LatestPointer.to_config().max_attempts >= 3);
        assert_eq!(RetryPolicy::Webhook.to_config().base_delay, Duration::from_secs(1));
    }

    proptest::proptest! {
        #[test]
        fn delay_never_exceeds_max(base_ms in 1u64..5000, max_ms in 1u64..100_000, attempt in 1u32..20) {
            let config = RetryStrategyConfig {
                strategy: RetryStrategyType::Exponential,
                max_attempts: 10,
                base_delay: Duration::from_millis(base_ms),
                max_delay: Duration::from_millis(max_ms),
                jitter: 0.0,
            };
            let d = calculate_delay(&config, attempt);
            proptest::prop_assert!(d.as_millis() as u64 <= max_ms);
        }
    }
}
