//! Config - キューと worker の設定
//!
//! すべてのフィールドにデフォルトがあり、JSON からは部分的に上書きできます。

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Worker / queue configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Idle wait between polls when no task is pending.
    pub poll_interval_ms: u64,

    /// Default bound for `WorkerHandle::stop`.
    pub stop_timeout_ms: u64,

    /// Mark tasks left RUNNING by a previous process as FAILED before the
    /// first poll.
    pub fail_orphaned_on_start: bool,

    /// Backoff for failed task store calls made by the worker.
    pub store_retry: StoreRetryPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 200,
            stop_timeout_ms: 5_000,
            fail_orphaned_on_start: true,
            store_retry: StoreRetryPolicy::default(),
        }
    }
}

impl QueueConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    /// Parse from JSON; missing fields keep their defaults.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "poll_interval_ms must be greater than 0".to_string(),
            ));
        }
        self.store_retry.validate()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Retry policy for task store calls.
///
/// Task execution itself is never retried; this only covers the worker's
/// reads and writes when the store reports `StoreUnavailable`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreRetryPolicy {
    /// Delay before the first retry.
    pub base_delay_ms: u64,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,

    /// Total attempts including the first call (at least 1).
    pub max_attempts: u32,

    /// Upper bound for a single delay.
    pub max_delay_ms: u64,
}

impl Default for StoreRetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 50,
            multiplier: 2.0,
            max_attempts: 5,
            max_delay_ms: 5_000,
        }
    }
}

impl StoreRetryPolicy {
    /// No retries: the first failure is returned.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay after the `attempts`-th failed call (1-indexed).
    ///
    /// delay = min(base_delay * multiplier^(attempts - 1), max_delay)
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let cap = Duration::from_millis(self.max_delay_ms);
        let base_secs = Duration::from_millis(self.base_delay_ms).as_secs_f64();
        let exponent = i32::try_from(attempts.saturating_sub(1)).unwrap_or(i32::MAX);
        let delay_secs = base_secs * self.multiplier.powf(f64::from(exponent));
        Duration::try_from_secs_f64(delay_secs).map_or(cap, |delay| delay.min(cap))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "store_retry.multiplier must be a finite number >= 1, got {}",
                self.multiplier
            )));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(ConfigError::Invalid(format!(
                "store_retry.base_delay_ms ({}) exceeds max_delay_ms ({})",
                self.base_delay_ms, self.max_delay_ms
            )));
        }
        Ok(())
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}
