use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, warn};

use super::classifier::Classify;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt; the operation runs at most `max_retries + 1` times.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            exponential_base: 2.0,
            jitter: true,
        }
    }
}

/// Runs an operation again when it fails with a retryable error.
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Delay before the retry that follows zero-based `attempt`.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let raw = self.config.base_delay.as_secs_f64() * self.config.exponential_base.powi(exponent);
        let mut delay = raw.min(self.config.max_delay.as_secs_f64());

        if self.config.jitter {
            delay *= 0.5 + rand::random::<f64>() * 0.5;
        }

        Duration::from_secs_f64(delay.max(0.0))
    }

    /// Returns the operation's last error unchanged when it is not retryable or the
    /// retries are used up.
    pub async fn execute_with_retry<F, Fut, T, E>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + Display,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(result) => {
                    if attempt > 0 {
                        debug!("Retry succeeded on attempt {}", attempt + 1);
                    }
                    return Ok(result);
                }
                Err(err) if !err.is_retryable() => {
                    error!("Non-retryable error on attempt {}: {}", attempt + 1, err);
                    return Err(err);
                }
                Err(err) if attempt >= self.config.max_retries => {
                    error!("All retry attempts failed. Last error: {}", err);
                    return Err(err);
                }
                Err(err) => {
                    let delay = self.calculate_delay(attempt);
                    warn!(
                        "Attempt {} failed, retrying in {:.2}s: {}",
                        attempt + 1,
                        delay.as_secs_f64(),
                        err
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
