use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::{QueueError, QueueResult};

/// Exponential backoff for transient store failures
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Add up to 50% random jitter to each delay
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`, capped
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt.saturating_sub(1));
        std::cmp::min(self.base_delay.saturating_mul(factor), self.max_delay)
    }

    fn delay_for(&self, attempt: u32, error: &QueueError) -> Duration {
        let mut delay = self.backoff(attempt);
        if let QueueError::Throttled { retry_after_ms } = error {
            delay = delay.max(Duration::from_millis(*retry_after_ms));
        }
        if self.jitter && !delay.is_zero() {
            let extra = rand::thread_rng().gen_range(0..=delay.as_millis() as u64 / 2);
            delay += Duration::from_millis(extra);
        }
        delay
    }
}

/// Run `operation` until it succeeds, fails with a non-transient error, or
/// the policy runs out of attempts.
pub async fn with_retries<T, F, Fut>(policy: &RetryPolicy, operation_name: &str, mut operation: F) -> QueueResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = QueueResult<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_transient() && attempt < max_attempts => {
                let delay = policy.delay_for(attempt, &error);
                debug!(
                    "{} failed with transient error (attempt {}/{}), retrying in {:?}: {}",
                    operation_name, attempt, max_attempts, delay, error
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(error) => {
                if error.is_transient() {
                    warn!("{} gave up after {} attempts: {}", operation_name, attempt, error);
                }
                return Err(error);
            }
        }
    }
}
