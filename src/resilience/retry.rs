use tokio::time::{sleep, Duration};
use anyhow::Result;
use tracing::{error, warn};

use crate::config::settings::RetryConfig;

#[derive(Debug, Clone)]
pub struct RetrySettings {
    pub attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl RetrySettings {
    pub fn from_config(retry: &Option<RetryConfig>) -> Self {
        Self {
            attempts: retry.as_ref().and_then(|r| r.attempts).unwrap_or(3),
            base_delay_ms: retry.as_ref().and_then(|r| r.base_delay_ms).unwrap_or(200),
            max_delay_ms: retry.as_ref().and_then(|r| r.max_delay_ms).unwrap_or(1000),
        }
    }

    /// Longest a full retry run can take when every attempt uses up
    /// `per_attempt`: all attempts plus the backoff sleeps between them.
    pub fn budget(&self, per_attempt: Duration) -> Duration {
        let attempts = self.attempts.max(1);
        let mut delay = self.base_delay_ms;
        let mut backoff_ms = 0u64;
        for _ in 1..attempts {
            backoff_ms = backoff_ms.saturating_add(delay);
            delay = (delay * 2).min(self.max_delay_ms);
        }
        per_attempt.saturating_mul(attempts).saturating_add(Duration::from_millis(backoff_ms))
    }

    pub async fn run_with_retry<F, Fut, T>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut delay = self.base_delay_ms;
        let attempts = self.attempts.max(1);

        for attempt in 1..=attempts {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < attempts => {
                    warn!("Attempt {attempt}/{} failed: {e}", attempts);
                    sleep(Duration::from_millis(delay)).await;
                    delay = (delay * 2).min(self.max_delay_ms);
                }
                Err(e) => {
                    error!("all {attempt} attempts failed: {e}");
                    return Err(e);
                }
            }
        }
        unreachable!("Retry loop exhausted unexpectedly")
    }
}
