use std::fmt::Display;
use std::future::Future;

use rand::Rng;
use tokio::time::{sleep, Duration};

use crate::config::GatewayConfig;
use crate::logging::log_gateway_retry;

/// Retry configuration
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Uniform jitter in `[0, jitter]` added on top of the exponential delay
    pub jitter: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            jitter: Duration::from_secs(1),
        }
    }
}

impl From<&GatewayConfig> for RetryConfig {
    fn from(cfg: &GatewayConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            base_delay: cfg.base_delay,
            jitter: cfg.jitter,
            ..Default::default()
        }
    }
}

impl RetryConfig {
    /// Exponential delay for a zero-based attempt index, before jitter
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2.0_f64.powi(attempt as i32);
        let base = self.base_delay.as_secs_f64() * factor;
        Duration::from_secs_f64(base.min(self.max_delay.as_secs_f64()))
    }

    /// Delay with exponential backoff and jitter
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let backoff = self.backoff_for_attempt(attempt);
        if self.jitter.is_zero() {
            return backoff;
        }
        let jitter = rand::thread_rng().gen_range(0.0..=self.jitter.as_secs_f64());
        backoff + Duration::from_secs_f64(jitter)
    }
}

/// Retry a fallible async operation, but only on errors `retryable` accepts.
///
/// Non-retryable errors, and retryable ones on the final attempt, are
/// returned unchanged.
pub async fn retry_classified<F, Fut, T, E, R>(
    config: &RetryConfig,
    label: &str,
    mut operation: F,
    retryable: R,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
    R: Fn(&E) -> bool,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if !retryable(&e) || attempt + 1 >= max_attempts {
                    return Err(e);
                }
                let delay = config.delay_for_attempt(attempt);
                log_gateway_retry(
                    label,
                    attempt + 1,
                    max_attempts,
                    delay.as_millis() as u64,
                    &e.to_string(),
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
