use std::future::Future;
use anyhow::{anyhow, Result};
use tokio::time::{sleep, Duration};
use rand::Rng;

use crate::logging::{log, obj, v_num, v_str, Domain, Level};

/// Retry configuration
#[derive(Clone, Debug)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 250,
            max_delay_ms: 5000,
            jitter_factor: 0.3,
        }
    }
}

impl RetryConfig {
    /// Exponential backoff with ±jitter_factor jitter.
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_delay_ms as f64 * 2.0_f64.powi(attempt as i32);
        let clamped = base.min(self.max_delay_ms as f64);

        let jitter_range = clamped * self.jitter_factor;
        let jitter: f64 = if jitter_range > 0.0 {
            rand::thread_rng().gen_range(-jitter_range..=jitter_range)
        } else {
            0.0
        };
        let final_delay = (clamped + jitter).max(0.0);

        Duration::from_millis(final_delay as u64)
    }
}

/// Retry a fallible async exchange call with exponential backoff
pub async fn retry_async<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_error: Option<anyhow::Error> = None;

    for attempt in 0..=config.max_retries {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if attempt < config.max_retries {
                    let delay = config.delay_for_attempt(attempt);
                    log(
                        Level::Warn,
                        Domain::Monitor,
                        "retry",
                        obj(&[
                            ("operation", v_str(operation_name)),
                            ("attempt", v_num((attempt + 1) as f64)),
                            ("max_attempts", v_num((config.max_retries + 1) as f64)),
                            ("error", v_str(&format!("{:#}", e))),
                            ("delay_ms", v_num(delay.as_millis() as f64)),
                        ]),
                    );
                    sleep(delay).await;
                }
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| anyhow!("retry_async exhausted without error")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_calculation() {
        let config = RetryConfig {
            max_retries: 3,
            base_delay_ms: 100,
            max_delay_ms: 1000,
            jitter_factor: 0.0,
        };

        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(800));
        assert_eq!(config.delay_for_attempt(4), Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn test_retry_gives_up_with_last_error() {
        let config = RetryConfig { max_retries: 2, base_delay_ms: 1, jitter_factor: 0.0, ..Default::default() };
        let counter = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
        let c = counter.clone();
        let result: Result<i32> = retry_async(&config, "get_positions", || {
            let c = c.clone();
            async move {
                let n = c.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Err(anyhow!("boom {}", n))
            }
        })
        .await;
        assert_eq!(result.unwrap_err().to_string(), "boom 2");
        assert_eq!(counter.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_eventual_success() {
        let config = RetryConfig { max_retries: 3, base_delay_ms: 1, ..Default::default() };
        let counter = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result: Result<i32> = retry_async(&config, "get_closed_trades", || {
            let c = counter_clone.clone();
            async move {
                if c.fetch_add(1, std::sync::atomic::Ordering::SeqCst) < 2 {
                    Err(anyhow!("not yet"))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(std::sync::atomic::Ordering::SeqCst), 3);
    }
}
