//! Exponential backoff retry for gateway operations
//!
//! Gateway requests travel over lossy UDP multicast and flaky SOAP endpoints,
//! so every network operation is wrapped in [`retry`]. Delays are plain
//! `tokio::time::sleep` calls inside whichever task drives the operation, so a
//! pending retry never keeps the runtime alive on shutdown.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Backoff parameters for a retried operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt (total attempts = `max_retries + 1`)
    pub max_retries: u32,
    /// Delay before the first retry in milliseconds
    pub initial_delay_ms: u64,
    /// Upper bound for any single delay in milliseconds
    pub max_delay_ms: u64,
    /// Multiplier applied to the delay after each failure
    pub factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 10,
            initial_delay_ms: 1_000,
            max_delay_ms: 60_000,
            factor: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the given failed attempt (1-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let delay_ms = self.initial_delay_ms as f64 * self.factor.max(1.0).powi(exponent);
        let capped = delay_ms.min(self.max_delay_ms as f64);
        Duration::from_millis(capped as u64)
    }

    /// Total number of attempts this policy allows
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Run `operation` until it succeeds or the policy's retry budget is spent
///
/// Every failed attempt is logged under `name`. The error of the final
/// attempt is returned once the budget is exhausted.
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, name: &str, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts();
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!("{} succeeded on attempt {}", name, attempt);
                }
                return Ok(value);
            }
            Err(e) if attempt >= max_attempts => {
                warn!("{} failed after {} attempts: {}", name, attempt, e);
                return Err(e);
            }
            Err(e) => {
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    "{} attempt {} failed ({} retries left, next in {:?}): {}",
                    name,
                    attempt,
                    max_attempts - attempt,
                    delay,
                    e
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
