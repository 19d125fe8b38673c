//! Queue configuration.
//!
//! Plain struct with defaults and `with_*` builders. Deployments that keep
//! settings in the environment can use [`QueueConfig::from_env`]:
//!
//! ```bash
//! export DOG_LEASE__KEEP_ALIVE_INTERVAL_SECS=10
//! export DOG_LEASE__INVISIBILITY_TIMEOUT_SECS=120
//! ```

use std::time::Duration;

use crate::retry::RetryPolicy;
use crate::{QueueError, QueueResult};

/// Default environment prefix for [`QueueConfig::from_env`]
pub const ENV_PREFIX: &str = "DOG_LEASE__";

#[derive(Debug, Clone, PartialEq)]
pub struct QueueConfig {
    /// Period of the keep-alive task owned by every fetched job
    pub keep_alive_interval: Duration,

    /// How long `get_queues` answers from cache
    pub queues_cache_ttl: Duration,

    /// A lease whose `fetched_at` is older than this is considered abandoned
    pub invisibility_timeout: Duration,

    /// Wait between fetch passes that found nothing
    pub fetch_poll_interval: Duration,

    /// Period of the stale-lease reaper
    pub reaper_interval: Duration,

    /// Retry policy applied to every store call
    pub retry: RetryPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            keep_alive_interval: Duration::from_secs(15),
            queues_cache_ttl: Duration::from_secs(5),
            invisibility_timeout: Duration::from_secs(300), // 5 minutes
            fetch_poll_interval: Duration::from_secs(1),
            reaper_interval: Duration::from_secs(60),
            retry: RetryPolicy::default(),
        }
    }
}

impl QueueConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_keep_alive_interval(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = interval;
        self
    }

    pub fn with_queues_cache_ttl(mut self, ttl: Duration) -> Self {
        self.queues_cache_ttl = ttl;
        self
    }

    pub fn with_invisibility_timeout(mut self, timeout: Duration) -> Self {
        self.invisibility_timeout = timeout;
        self
    }

    pub fn with_fetch_poll_interval(mut self, interval: Duration) -> Self {
        self.fetch_poll_interval = interval;
        self
    }

    pub fn with_reaper_interval(mut self, interval: Duration) -> Self {
        self.reaper_interval = interval;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Load overrides from process environment variables starting with `prefix`
    pub fn from_env(prefix: &str) -> QueueResult<Self> {
        Self::from_vars(prefix, std::env::vars())
    }

    /// Load overrides from `(key, value)` pairs; unknown keys are ignored
    pub fn from_vars<I>(prefix: &str, vars: I) -> QueueResult<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut config = Self::default();

        for (key, value) in vars {
            let Some(name) = key.strip_prefix(prefix) else {
                continue;
            };
            let name = name.to_ascii_uppercase();
            match name.as_str() {
                "KEEP_ALIVE_INTERVAL_SECS" => {
                    config.keep_alive_interval = Duration::from_secs(parse(&key, &value)?)
                }
                "QUEUES_CACHE_TTL_SECS" => {
                    config.queues_cache_ttl = Duration::from_secs(parse(&key, &value)?)
                }
                "INVISIBILITY_TIMEOUT_SECS" => {
                    config.invisibility_timeout = Duration::from_secs(parse(&key, &value)?)
                }
                "FETCH_POLL_INTERVAL_MS" => {
                    config.fetch_poll_interval = Duration::from_millis(parse(&key, &value)?)
                }
                "REAPER_INTERVAL_SECS" => {
                    config.reaper_interval = Duration::from_secs(parse(&key, &value)?)
                }
                "RETRY_MAX_ATTEMPTS" => config.retry.max_attempts = parse(&key, &value)? as u32,
                "RETRY_BASE_DELAY_MS" => {
                    config.retry.base_delay = Duration::from_millis(parse(&key, &value)?)
                }
                "RETRY_MAX_DELAY_MS" => {
                    config.retry.max_delay = Duration::from_millis(parse(&key, &value)?)
                }
                _ => {}
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would break the lease protocol
    pub fn validate(&self) -> QueueResult<()> {
        if self.keep_alive_interval.is_zero() {
            return Err(QueueError::invalid("keep_alive_interval must be greater than zero"));
        }
        if self.fetch_poll_interval.is_zero() {
            return Err(QueueError::invalid("fetch_poll_interval must be greater than zero"));
        }
        if self.reaper_interval.is_zero() {
            return Err(QueueError::invalid("reaper_interval must be greater than zero"));
        }
        if self.keep_alive_interval >= self.invisibility_timeout {
            return Err(QueueError::invalid(
                "keep_alive_interval must be shorter than invisibility_timeout",
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(QueueError::invalid("retry.max_attempts must be at least 1"));
        }
        Ok(())
    }
}

fn parse(key: &str, value: &str) -> QueueResult<u64> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|_| QueueError::invalid(format!("{} must be a non-negative integer, got {:?}", key, value)))
}
