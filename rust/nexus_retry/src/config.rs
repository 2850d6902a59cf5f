//! Scheduler configuration and JSON parsing helpers.
//!
//! The backoff curve itself is fixed (linear multiples of the period unit);
//! only the unit, the ceiling and the worker plumbing are configurable.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RetryError};

/// Base delay between retry attempts (15s).
pub const DEFAULT_RETRY_PERIOD_UNIT_MS: u64 = 15 * 1000;
/// Upper bound on how long a not-yet-due task waits before being re-checked.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
/// Retry ceiling: attempts allowed after the first one.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Soft queue size above which `submit` logs a warning.
pub const DEFAULT_QUEUE_WARN_THRESHOLD: usize = 1000;
pub const DEFAULT_THREAD_NAME_PREFIX: &str = "ErrorMessageProcessor";
pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub retry_period_unit_ms: u64,
    pub poll_interval_ms: u64,
    pub max_retries: u32,
    pub queue_warn_threshold: usize,
    pub worker_count: usize,
    pub thread_name_prefix: String,
    pub shutdown_grace_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retry_period_unit_ms: DEFAULT_RETRY_PERIOD_UNIT_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            queue_warn_threshold: DEFAULT_QUEUE_WARN_THRESHOLD,
            worker_count: 1,
            thread_name_prefix: DEFAULT_THREAD_NAME_PREFIX.to_string(),
            shutdown_grace_ms: DEFAULT_SHUTDOWN_GRACE_MS,
        }
    }
}

impl RetryConfig {
    /// Reject settings the worker loop cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.retry_period_unit_ms == 0 {
            return Err(RetryError::InvalidConfig(
                "retry_period_unit_ms must be > 0".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(RetryError::InvalidConfig(
                "poll_interval_ms must be > 0".to_string(),
            ));
        }
        if self.worker_count == 0 {
            return Err(RetryError::InvalidConfig(
                "worker_count must be >= 1".to_string(),
            ));
        }
        if self.thread_name_prefix.is_empty() {
            return Err(RetryError::InvalidConfig(
                "thread_name_prefix must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// Parse a retry config from a JSON string. Missing fields take their defaults.
pub fn parse_retry_config(json: &str) -> Result<RetryConfig> {
    let config: RetryConfig = serde_json::from_str(json)?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RetryConfig::default();
        assert_eq!(config.retry_period_unit_ms, 15_000);
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.queue_warn_threshold, 1000);
        assert_eq!(config.worker_count, 1);
        assert_eq!(config.thread_name_prefix, "ErrorMessageProcessor");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_json() {
        let config = parse_retry_config(r#"{"retry_period_unit_ms":50,"worker_count":2}"#).unwrap();
        assert_eq!(config.retry_period_unit_ms, 50);
        assert_eq!(config.worker_count, 2);
        // untouched fields keep defaults
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.poll_interval_ms, 1000);
    }

    #[test]
    fn test_parse_empty_object() {
        let config = parse_retry_config("{}").unwrap();
        assert_eq!(config, RetryConfig::default());
    }

    #[test]
    fn test_parse_malformed() {
        assert!(matches!(
            parse_retry_config("{not json"),
            Err(RetryError::ConfigParse(_))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        for json in [
            r#"{"retry_period_unit_ms":0}"#,
            r#"{"poll_interval_ms":0}"#,
            r#"{"worker_count":0}"#,
            r#"{"thread_name_prefix":""}"#,
        ] {
            assert!(
                matches!(parse_retry_config(json), Err(RetryError::InvalidConfig(_))),
                "expected rejection for {json}"
            );
        }
    }
}
