//! Retry logic with exponential backoff
//!
//! Used around every I/O edge the domain processor and the sweep loops
//! touch. Only errors classified transient are re-attempted; validation
//! and state-machine errors surface immediately. A shutdown signal aborts
//! the wait between attempts.

use std::time::Duration;

use rand::Rng;
use tokio::sync::watch;
use tokio::time::sleep;

use crate::error::{MarriageError, MarriageResult};

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of re-attempts after the first failure
    pub max_attempts: u32,
    /// Delay before the first retry (milliseconds)
    pub initial_delay_ms: u64,
    /// Ceiling for the exponential delay (milliseconds)
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1_000,
            max_delay_ms: 10_000,
        }
    }
}

/// `initial × 2^attempt`, capped, plus uniform jitter in `[0, delay/2]`
fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let exponential = config
        .initial_delay_ms
        .saturating_mul(1u64 << attempt.min(16));
    let capped = exponential.min(config.max_delay_ms);
    let jitter = rand::thread_rng().gen_range(0..=capped / 2);
    Duration::from_millis(capped + jitter)
}

/// Execute `op` with exponential backoff on transient failures.
///
/// Returns [`MarriageError::Cancelled`] if the shutdown signal fires while
/// waiting between attempts.
pub async fn retry_with_backoff<F, Fut, T>(
    config: &RetryConfig,
    shutdown: &mut watch::Receiver<bool>,
    mut op: F,
) -> MarriageResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = MarriageResult<T>>,
{
    let mut attempt = 0;
    loop {
        if *shutdown.borrow() {
            return Err(MarriageError::Cancelled);
        }
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < config.max_attempts && e.is_transient() => {
                let delay = backoff_delay(config, attempt);
                tracing::warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "transient failure, backing off"
                );
                tokio::select! {
                    _ = sleep(delay) => {}
                    _ = shutdown.changed() => return Err(MarriageError::Cancelled),
                }
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
