//! Backoff for idempotent remote calls.
//!
//! Only reads and get-or-create lookups go through here. Uploads and catalog
//! commits are never retried automatically: a retried upload after an
//! ambiguous failure could race a NameCollision, and a retried commit could
//! mask a concurrent edit.

use crate::error::{Result, ShelfError};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// How often and how patiently a remote read is retried.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Upper bound for any single wait, including a server's `Retry-After`.
    pub max_delay: Duration,
    /// Scale computed waits by a random factor in `[0.5, 1.5)`.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: crate::config::NetworkConfig::MAX_RETRIES,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// No waiting and a single attempt; for tests and scripted runs.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: false,
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Wait before the retry following failed attempt `attempt` (0-indexed).
    ///
    /// A rate limit with a server hint waits exactly that long; anything
    /// else backs off as `base * 2^attempt`. Both are capped by `max_delay`.
    pub fn delay_for(&self, attempt: u32, error: &ShelfError) -> Duration {
        if let ShelfError::RateLimited {
            retry_after_secs: Some(secs),
        } = error
        {
            return Duration::from_secs(*secs).min(self.max_delay);
        }

        let cap = self.max_delay.as_secs_f64();
        let mut secs = (self.base_delay.as_secs_f64() * 2f64.powi(attempt.min(30) as i32)).min(cap);
        if self.jitter {
            secs = (secs * rand::rng().random_range(0.5..1.5)).min(cap);
        }
        Duration::from_secs_f64(secs)
    }
}

/// What a retried call cost.
#[derive(Debug, Clone, Default)]
pub struct RetryStats {
    pub attempts: u32,
    pub waited: Duration,
}

/// Run `call` until it succeeds, fails with a non-retryable error (see
/// [`ShelfError::is_retryable`]) or runs out of attempts. The last error is
/// returned on failure.
pub async fn retry_async<F, Fut, T>(
    config: &RetryConfig,
    context: &str,
    mut call: F,
) -> (Result<T>, RetryStats)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut stats = RetryStats::default();
    let max_attempts = config.max_attempts.max(1);

    loop {
        stats.attempts += 1;
        let error = match call().await {
            Ok(value) => return (Ok(value), stats),
            Err(e) => e,
        };

        if !error.is_retryable() {
            return (Err(error), stats);
        }
        if stats.attempts >= max_attempts {
            warn!("{}: giving up after {} attempts: {}", context, stats.attempts, error);
            return (Err(error), stats);
        }

        let delay = config.delay_for(stats.attempts - 1, &error);
        stats.waited += delay;
        debug!(
            "{}: attempt {}/{} failed ({}), waiting {:?}",
            context, stats.attempts, max_attempts, error, delay
        );
        tokio::time::sleep(delay).await;
    }
}
