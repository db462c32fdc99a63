use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::SentiscopeConfig;
use crate::error::{Result, SentiscopeError};

/// Up to `n` items. Without a seed this is the first `n` in order; with a
/// seed, a reproducible shuffle.
pub fn sample_items<T: Clone>(items: &[T], n: usize, seed: Option<u64>) -> Vec<T> {
    use rand::{seq::SliceRandom, SeedableRng};

    let Some(seed) = seed else {
        return items.iter().take(n).cloned().collect();
    };
    if items.len() <= n {
        return items.to_vec();
    }

    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    let mut indices: Vec<usize> = (0..items.len()).collect();
    indices.shuffle(&mut rng);

    indices.into_iter().take(n).map(|i| items[i].clone()).collect()
}

/// Rounds to one decimal place.
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// `part / total * 100` to one decimal, 0 when `total` is 0.
pub fn percentage(part: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    round1(part as f64 / total as f64 * 100.0)
}

// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(2000),
            max_delay: Duration::from_secs(30),
            exponential_base: 1.0,
            jitter: false,
        }
    }
}

impl RetryConfig {
    /// Fixed attempts with a fixed delay, as used for single-shot calls.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: delay,
            max_delay: delay,
            exponential_base: 1.0,
            jitter: false,
        }
    }

    pub fn from_config(config: &SentiscopeConfig) -> Self {
        Self::fixed(config.retry_attempts, config.retry_delay())
    }
}

/// Retries `operation` while it fails with a retryable error, up to
/// `config.max_attempts` attempts in total.
pub async fn retry_with_backoff<F, Fut, T>(
    mut operation: F,
    config: RetryConfig,
    operation_name: &str,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;
        debug!("Attempting {} (attempt {}/{})", operation_name, attempt, config.max_attempts);

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    info!("{} succeeded after {} attempts", operation_name, attempt);
                }
                return Ok(result);
            }
            Err(e) if !e.is_retryable() => {
                debug!("{} failed with non-retryable error: {}", operation_name, e);
                return Err(e);
            }
            Err(e) if attempt >= config.max_attempts => {
                error!("{} failed after {} attempts: {}", operation_name, attempt, e);
                return Err(e);
            }
            Err(e) => {
                warn!(
                    "{} attempt {} failed: {}, retrying in {:?}",
                    operation_name, attempt, e, delay
                );

                sleep(delay).await;

                delay = Duration::from_secs_f64(
                    (delay.as_secs_f64() * config.exponential_base).min(config.max_delay.as_secs_f64()),
                );

                if config.jitter {
                    use rand::Rng;
                    let jitter = rand::thread_rng().gen_range(0.8..1.2);
                    delay = Duration::from_secs_f64(delay.as_secs_f64() * jitter);
                }
            }
        }
    }
}

// Timeout wrapper
pub async fn with_timeout<F, Fut, T>(operation: F, timeout: Duration, operation_name: &str) -> Result<T>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, operation()).await {
        Ok(result) => result,
        Err(_) => Err(SentiscopeError::Timeout(format!(
            "{} timed out after {:?}",
            operation_name, timeout
        ))),
    }
}
