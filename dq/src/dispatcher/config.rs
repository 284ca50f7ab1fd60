//! Dispatcher configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::queue::QueueKind;
use crate::retry::RetryConfig;

/// Retry behavior for a submission
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryPolicy {
    /// Run the task once
    #[default]
    Off,

    /// Default backoff with this many re-invocations
    Count(u32),

    /// Full backoff configuration
    Config(RetryConfig),
}

impl RetryPolicy {
    /// Resolve to a concrete backoff configuration, if retrying at all
    pub fn config(&self) -> Option<RetryConfig> {
        match self {
            RetryPolicy::Off => None,
            RetryPolicy::Count(retries) => Some(RetryConfig::with_retries(*retries)),
            RetryPolicy::Config(config) => Some(config.clone()),
        }
    }
}

/// Options fixed at dispatcher construction
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Max simultaneous in-flight tasks; `None` is unbounded
    #[serde(default)]
    pub concurrency: Option<usize>,

    /// Max dispatch starts per rate window; `None` disables limiting
    #[serde(default)]
    pub rate_limit: Option<u32>,

    /// Rate window length in milliseconds; 0 disables limiting
    #[serde(default)]
    pub rate_interval_ms: u64,

    /// Count still-in-flight tasks against a newly opened window
    #[serde(default)]
    pub pending_carryover: bool,

    /// Engine-default retry behavior
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Start paused
    #[serde(default)]
    pub paused: bool,

    /// Queue implementation backing the dispatcher
    #[serde(default)]
    pub queue_kind: QueueKind,
}

impl DispatcherConfig {
    /// Effective concurrency ceiling
    pub fn concurrency(&self) -> usize {
        self.concurrency.unwrap_or(usize::MAX)
    }

    /// Whether both halves of the rate limit are configured
    pub fn rate_limiting_enabled(&self) -> bool {
        self.rate_limit.is_some() && self.rate_interval_ms > 0
    }

    /// Effective per-window dispatch budget
    pub fn rate_limit(&self) -> u32 {
        self.rate_limit.unwrap_or(u32::MAX)
    }

    /// Rate window length as a Duration
    pub fn rate_interval(&self) -> Duration {
        Duration::from_millis(self.rate_interval_ms)
    }
}

/// Options owned by a single submission
#[derive(Debug, Clone, Default)]
pub struct DispatchOptions {
    /// Lower dispatches sooner; only meaningful with a priority queue
    pub priority: i64,

    /// Rejects the submission if it fires before dispatch
    pub cancellation: Option<CancellationToken>,

    /// Per-call override of the engine-default retry behavior
    pub retry: Option<RetryPolicy>,
}

impl DispatchOptions {
    pub fn with_priority(priority: i64) -> Self {
        Self { priority, ..Self::default() }
    }

    pub fn with_cancellation(token: CancellationToken) -> Self {
        Self {
            cancellation: Some(token),
            ..Self::default()
        }
    }

    pub fn with_retry(policy: RetryPolicy) -> Self {
        Self {
            retry: Some(policy),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DispatcherConfig::default();
        assert_eq!(config.concurrency(), usize::MAX);
        assert!(!config.rate_limiting_enabled());
        assert_eq!(config.retry, RetryPolicy::Off);
        assert!(!config.paused);
        assert_eq!(config.queue_kind, QueueKind::Priority);
    }

    #[test]
    fn test_serde_defaults() {
        let config: DispatcherConfig = serde_json::from_str("{}").unwrap();
        assert!(config.concurrency.is_none());
        assert!(!config.pending_carryover);

        let config: DispatcherConfig =
            serde_json::from_str(r#"{"concurrency": 4, "rate_limit": 2, "rate_interval_ms": 1000}"#).unwrap();
        assert_eq!(config.concurrency(), 4);
        assert!(config.rate_limiting_enabled());
        assert_eq!(config.rate_interval(), Duration::from_millis(1000));
    }

    #[test]
    fn test_rate_limiting_needs_both_halves() {
        let config = DispatcherConfig {
            rate_limit: Some(5),
            ..DispatcherConfig::default()
        };
        assert!(!config.rate_limiting_enabled());

        let config = DispatcherConfig {
            rate_interval_ms: 1000,
            ..DispatcherConfig::default()
        };
        assert!(!config.rate_limiting_enabled());
    }

    #[test]
    fn test_retry_policy_resolution() {
        assert!(RetryPolicy::Off.config().is_none());

        let config = RetryPolicy::Count(5).config().unwrap();
        assert_eq!(config.retries, 5);

        let custom = RetryConfig::with_retries(1);
        let config = RetryPolicy::Config(custom.clone()).config().unwrap();
        assert_eq!(config.retries, custom.retries);
    }

    #[test]
    fn test_retry_policy_serde() {
        let policy: RetryPolicy = serde_json::from_str("\"off\"").unwrap();
        assert_eq!(policy, RetryPolicy::Off);

        let policy: RetryPolicy = serde_json::from_str(r#"{"count": 2}"#).unwrap();
        assert_eq!(policy, RetryPolicy::Count(2));
    }
}
