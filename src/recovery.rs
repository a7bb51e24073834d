/*!
 * Bounded retry with exponential backoff.
 *
 * A `RetryPolicy` wraps a single async operation. Failures are classified
 * (see `errors::ErrorClass`); transient and resource failures are retried
 * with an exponentially increasing delay, permanent failures are returned
 * immediately, and the last error is re-raised once attempts run out.
 */

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

use crate::errors::{Classify, ErrorClass};

/// Retry settings as they appear in configuration files.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    /// Total attempts, including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry, in milliseconds
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Multiplier applied to the delay after every retry
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Upper bound for a single delay, in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            multiplier: default_multiplier(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

/// Retry policy applied by a caller around one operation.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    multiplier: f64,
    max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    /// Create a policy with explicit parameters.
    pub fn new(max_attempts: u32, base_delay: Duration, multiplier: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            multiplier: if multiplier.is_finite() && multiplier >= 1.0 { multiplier } else { 1.0 },
            max_delay: Duration::from_millis(default_max_delay_ms()),
        }
    }

    /// Build a policy from configuration.
    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.base_delay_ms),
            config.multiplier,
        )
        .with_max_delay(Duration::from_millis(config.max_delay_ms))
    }

    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO, 1.0)
    }

    /// Cap the delay between attempts.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Total attempts, including the first one.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let factor = self.multiplier.powi(exponent);
        let millis = (self.base_delay.as_millis() as f64 * factor).min(self.max_delay.as_millis() as f64);
        Duration::from_millis(millis.max(0.0) as u64)
    }

    /// Run an operation, classifying errors through their `Classify` impl.
    pub async fn run<T, E, F, Fut>(&self, operation: &str, op: F) -> Result<T, E>
    where
        E: Classify + std::fmt::Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run_with(operation, |e: &E| e.class(), op).await
    }

    /// Run an operation with an explicit classifier function.
    ///
    /// `op` receives the 1-based attempt number.
    pub async fn run_with<T, E, C, F, Fut>(&self, operation: &str, classify: C, mut op: F) -> Result<T, E>
    where
        E: std::fmt::Display,
        C: Fn(&E) -> ErrorClass,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!("{} succeeded on attempt {}", operation, attempt);
                    }
                    return Ok(value);
                }
                Err(error) => {
                    let class = classify(&error);
                    if !class.is_retryable() {
                        debug!("{} failed permanently: {}", operation, error);
                        return Err(error);
                    }
                    if attempt >= self.max_attempts {
                        warn!(
                            "{} failed after {} attempts ({:?}): {}",
                            operation, attempt, class, error
                        );
                        return Err(error);
                    }

                    let delay = self.delay_for(attempt);
                    warn!(
                        "{} attempt {}/{} failed ({:?}): {}. Retrying in {:?}",
                        operation, attempt, self.max_attempts, class, error, delay
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
            }
        }
    }
}
