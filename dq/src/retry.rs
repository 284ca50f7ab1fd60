//! Retry with exponential backoff
//!
//! Stateless helper: re-invokes a task until success, budget exhaustion,
//! predicate veto, or cancellation. `retries = n` means at most `n + 1`
//! invocations.

use std::future::Future;
use std::time::Duration;

use eyre::eyre;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Context handed to every task invocation
#[derive(Debug, Clone)]
pub struct TaskContext {
    /// Zero-based attempt number
    pub attempt: u32,

    /// Token the task body may observe to stop early
    pub cancellation: CancellationToken,
}

/// Backoff configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Re-invocations after the first attempt
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Exponential growth factor between attempts
    #[serde(default = "default_factor")]
    pub factor: f64,

    /// Delay before the first re-invocation
    #[serde(default = "default_min_timeout", with = "duration_ms")]
    pub min_timeout: Duration,

    /// Cap applied to every delay
    #[serde(default = "default_max_timeout", with = "duration_ms")]
    pub max_timeout: Duration,

    /// Multiply each delay by `1 + random(0..1)`
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

fn default_retries() -> u32 {
    3
}

fn default_factor() -> f64 {
    2.0
}

fn default_min_timeout() -> Duration {
    Duration::from_millis(1000)
}

fn default_max_timeout() -> Duration {
    Duration::from_millis(10_000)
}

fn default_jitter() -> bool {
    true
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retries: default_retries(),
            factor: default_factor(),
            min_timeout: default_min_timeout(),
            max_timeout: default_max_timeout(),
            jitter: default_jitter(),
        }
    }
}

impl RetryConfig {
    /// Default configuration with a different attempt budget
    pub fn with_retries(retries: u32) -> Self {
        Self { retries, ..Self::default() }
    }

    /// Delay before re-invoking after a failed `attempt`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.min_timeout.mul_f64(self.factor.powi(attempt as i32));
        let delayed = if self.jitter {
            base.mul_f64(1.0 + rand::random::<f64>())
        } else {
            base
        };
        delayed.min(self.max_timeout)
    }
}

/// Optional per-attempt hooks for [`retry_with`]
#[derive(Default)]
pub struct RetryHooks {
    /// Called with every failed attempt's error, before the retry decision
    pub on_failed_attempt: Option<Box<dyn FnMut(&eyre::Report) + Send>>,

    /// Veto: returning false stops retrying and propagates the error
    pub should_retry: Option<Box<dyn Fn(&eyre::Report) -> bool + Send>>,
}

/// Re-invoke `task` until success or the budget is exhausted
pub async fn retry<T, F, Fut>(config: &RetryConfig, token: &CancellationToken, task: F) -> eyre::Result<T>
where
    F: FnMut(TaskContext) -> Fut,
    Fut: Future<Output = eyre::Result<T>>,
{
    retry_with(config, token, RetryHooks::default(), task).await
}

/// [`retry`] with failure hooks
pub async fn retry_with<T, F, Fut>(
    config: &RetryConfig,
    token: &CancellationToken,
    mut hooks: RetryHooks,
    mut task: F,
) -> eyre::Result<T>
where
    F: FnMut(TaskContext) -> Fut,
    Fut: Future<Output = eyre::Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        if token.is_cancelled() {
            debug!(attempt, "retry: cancelled before attempt");
            return Err(eyre!("cancelled before attempt {attempt}"));
        }

        let context = TaskContext {
            attempt,
            cancellation: token.clone(),
        };
        match task(context).await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if let Some(hook) = hooks.on_failed_attempt.as_mut() {
                    hook(&error);
                }

                let exhausted = attempt >= config.retries;
                let vetoed = hooks.should_retry.as_ref().is_some_and(|predicate| !predicate(&error));
                if exhausted || vetoed {
                    debug!(attempt, exhausted, vetoed, "retry: giving up");
                    return Err(error);
                }

                let delay = config.delay_for(attempt);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "retry: backing off");
                tokio::select! {
                    _ = token.cancelled() => {
                        return Err(eyre!("cancelled during backoff after attempt {attempt}"));
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn no_jitter(retries: u32) -> RetryConfig {
        RetryConfig {
            retries,
            jitter: false,
            min_timeout: Duration::from_millis(10),
            max_timeout: Duration::from_millis(100),
            ..RetryConfig::default()
        }
    }

    #[test]
    fn test_default_config() {
        let config = RetryConfig::default();
        assert_eq!(config.retries, 3);
        assert_eq!(config.factor, 2.0);
        assert_eq!(config.min_timeout, Duration::from_millis(1000));
        assert_eq!(config.max_timeout, Duration::from_millis(10_000));
        assert!(config.jitter);
    }

    #[test]
    fn test_config_serde_defaults() {
        let config: RetryConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.retries, 3);
        assert_eq!(config.min_timeout, Duration::from_millis(1000));

        let config: RetryConfig = serde_json::from_str(r#"{"retries": 1, "min_timeout": 50}"#).unwrap();
        assert_eq!(config.retries, 1);
        assert_eq!(config.min_timeout, Duration::from_millis(50));
    }

    #[test]
    fn test_delay_grows_exponentially_and_caps() {
        let config = RetryConfig {
            retries: 10,
            factor: 2.0,
            min_timeout: Duration::from_millis(100),
            max_timeout: Duration::from_millis(350),
            jitter: false,
        };
        assert_eq!(config.delay_for(0), Duration::from_millis(100));
        assert_eq!(config.delay_for(1), Duration::from_millis(200));
        assert_eq!(config.delay_for(2), Duration::from_millis(350));
        assert_eq!(config.delay_for(5), Duration::from_millis(350));
    }

    #[test]
    fn test_jitter_stays_within_double() {
        let config = RetryConfig {
            retries: 1,
            factor: 2.0,
            min_timeout: Duration::from_millis(100),
            max_timeout: Duration::from_secs(60),
            jitter: true,
        };
        for _ in 0..100 {
            let delay = config.delay_for(0);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay < Duration::from_millis(200));
        }
    }

    #[tokio::test]
    async fn test_success_on_first_attempt_invokes_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let token = CancellationToken::new();

        let value = retry(&no_jitter(3), &token, move |_context| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, eyre::Report>(42)
            }
        })
        .await
        .unwrap();

        assert_eq!(value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_failures() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let token = CancellationToken::new();

        let value = retry(&no_jitter(3), &token, move |context| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                if context.attempt < 2 {
                    Err(eyre!("attempt {} failed", context.attempt))
                } else {
                    Ok(context.attempt)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(value, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invokes_at_most_retries_plus_one() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let token = CancellationToken::new();

        let result: eyre::Result<()> = retry(&no_jitter(2), &token, move |_context| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(eyre!("always fails"))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_should_retry_veto_stops_immediately() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let token = CancellationToken::new();
        let hooks = RetryHooks {
            should_retry: Some(Box::new(|error| !error.to_string().contains("fatal"))),
            ..RetryHooks::default()
        };

        let result: eyre::Result<()> = retry_with(&no_jitter(5), &token, hooks, move |_context| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(eyre!("fatal: unrecoverable"))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_on_failed_attempt_sees_every_failure() {
        let seen = Arc::new(AtomicUsize::new(0));
        let observer = Arc::clone(&seen);
        let token = CancellationToken::new();
        let hooks = RetryHooks {
            on_failed_attempt: Some(Box::new(move |_error| {
                observer.fetch_add(1, Ordering::SeqCst);
            })),
            ..RetryHooks::default()
        };

        let result: eyre::Result<()> =
            retry_with(&no_jitter(2), &token, hooks, |_context| async { Err(eyre!("nope")) }).await;

        assert!(result.is_err());
        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cancelled_token_fails_before_invoking() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let token = CancellationToken::new();
        token.cancel();

        let result: eyre::Result<()> = retry(&no_jitter(3), &token, move |_context| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_backoff() {
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            canceller.cancel();
        });

        let config = RetryConfig {
            retries: 3,
            jitter: false,
            min_timeout: Duration::from_secs(3600),
            max_timeout: Duration::from_secs(3600),
            ..RetryConfig::default()
        };
        let result: eyre::Result<()> = retry(&config, &token, |_context| async { Err(eyre!("nope")) }).await;

        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("cancelled"));
    }
}
