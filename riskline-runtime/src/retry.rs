//! Retry logic for transient stage failures

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry strategy for failed attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    /// No retries
    None,

    /// Fixed delay between retries
    Fixed,

    /// Exponential backoff
    Exponential,

    /// Exponential backoff with up to 50% random jitter subtracted
    ExponentialWithJitter,
}

/// Retry policy configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,

    /// Delay before the first retry
    #[serde(with = "millis")]
    pub initial_delay: Duration,

    /// Maximum delay between retries
    #[serde(with = "millis")]
    pub max_delay: Duration,

    pub strategy: RetryStrategy,

    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            strategy: RetryStrategy::ExponentialWithJitter,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            strategy: RetryStrategy::None,
            ..Default::default()
        }
    }

    /// Delay before retrying after the given 1-based failed attempt
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let exponential = || {
            let delay = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
            delay.min(self.max_delay.as_secs_f64()).max(0.0)
        };

        match self.strategy {
            RetryStrategy::None => Duration::ZERO,
            RetryStrategy::Fixed => self.initial_delay,
            RetryStrategy::Exponential => Duration::from_secs_f64(exponential()),
            RetryStrategy::ExponentialWithJitter => {
                let delay = exponential();
                let jitter = rand::thread_rng().gen_range(0.0..=0.5);
                Duration::from_secs_f64(delay * (1.0 - jitter))
            }
        }
    }

    /// Whether another attempt may follow the given 1-based attempt
    pub fn should_retry(&self, attempt: u32) -> bool {
        self.strategy != RetryStrategy::None && attempt < self.max_attempts
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.max_attempts == 0 {
            return Err(crate::Error::InvalidConfig(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if !(self.backoff_multiplier.is_finite() && self.backoff_multiplier >= 1.0) {
            return Err(crate::Error::InvalidConfig(
                "retry.backoff_multiplier must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis().min(u128::from(u64::MAX)) as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
