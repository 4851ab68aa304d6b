//! Bounded retries with exponential backoff for outbound calls
//!
//! Every attempt runs under a timeout. Only errors that report themselves as
//! retryable are retried.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Per-attempt timeout
    pub timeout: Duration,
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            max_retries: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            backoff_factor: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Single attempt, no backoff
    pub fn no_retry(timeout: Duration) -> Self {
        Self {
            timeout,
            max_retries: 0,
            ..Self::default()
        }
    }
}

pub trait RetryableError {
    fn is_retryable(&self) -> bool;

    /// Error reported when an attempt exceeds the timeout
    fn timed_out(after: Duration) -> Self;
}

fn calculate_delay(cfg: &RetryConfig, attempt: u32) -> Duration {
    let exponential = cfg.base_delay.as_secs_f64() * cfg.backoff_factor.powi(attempt as i32);
    let capped = exponential.min(cfg.max_delay.as_secs_f64());
    let delay = if cfg.jitter {
        capped * (0.5 + rand::random::<f64>() * 0.5)
    } else {
        capped
    };
    Duration::from_secs_f64(delay)
}

pub async fn retry<F, Fut, T, E>(cfg: &RetryConfig, operation: &str, mut f: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RetryableError + std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        let result = match tokio::time::timeout(cfg.timeout, f()).await {
            Ok(result) => result,
            Err(_) => Err(E::timed_out(cfg.timeout)),
        };
        match result {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !err.is_retryable() {
                    warn!(operation, error = %err, attempt, "non-retryable error encountered");
                    return Err(err);
                }
                if attempt >= cfg.max_retries {
                    warn!(operation, error = %err, attempt, "max retry attempts exhausted");
                    return Err(err);
                }
                let delay = calculate_delay(cfg, attempt);
                warn!(
                    operation,
                    error = %err,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retrying after error"
                );
                attempt += 1;
                tokio::time::sleep(delay).await;
            }
        }
    }
}
