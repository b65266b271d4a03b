//! Retry with exponential backoff.
//!
//! Every unit of network work (metadata queries and content downloads
//! alike) runs through [`with_backoff`]. A failure is retried unless the
//! error says the resource does not exist; once the retry budget is spent
//! the last error is returned unchanged.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use wikifetch_core::Error;

/// Retry schedule.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Retries after the first attempt (default: 7).
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Growth factor applied after each retry.
    pub multiplier: f64,
    /// Random spread added to each delay, as a fraction of it (0 disables).
    pub randomisation: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            max_retries: 7,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            randomisation: 0.2,
        }
    }
}

impl BackoffConfig {
    /// Delay before retry number `retry` (1-based), before randomisation.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exp = self.multiplier.powi(retry.saturating_sub(1) as i32);
        let secs = self.initial_delay.as_secs_f64() * exp;
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }

    fn randomise(&self, delay: Duration) -> Duration {
        if self.randomisation <= 0.0 {
            return delay;
        }
        let factor: f64 = rand::thread_rng().gen_range(0.0..=self.randomisation);
        Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + factor))
    }
}

/// Errors that know whether another attempt could succeed.
pub trait IsRetryable {
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::FetchTimeout(_) => true,
            Error::NotFound(_) => false,
            Error::InvalidUrl(_) | Error::InvalidInput(_) | Error::ThrottleClosed => false,
            other => !other.is_not_found(),
        }
    }
}

/// Run `operation` until it succeeds, fails permanently, or runs out of retries.
pub async fn with_backoff<F, Fut, T, E>(config: &BackoffConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + Display,
{
    let mut retry = 0;

    loop {
        match operation().await {
            Ok(value) => {
                if retry > 0 {
                    tracing::debug!(attempts = retry + 1, "operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if e.is_retryable() && retry < config.max_retries => {
                retry += 1;
                let delay = config.randomise(config.delay_for(retry));

                tracing::warn!(
                    error = %e,
                    attempt = retry,
                    max_retries = config.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "request failed, backing off"
                );

                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(error = %e, attempts = retry + 1, "giving up after exhausting retries");
                } else {
                    tracing::debug!(error = %e, "not retrying permanent failure");
                }
                return Err(e);
            }
        }
    }
}
