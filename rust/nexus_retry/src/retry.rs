use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::RetryConfig;

/// The two knobs of the fixed backoff family, copied into every task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub unit_ms: u64,
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            unit_ms: config.retry_period_unit_ms,
            max_retries: config.max_retries,
        }
    }
}

/// Wall-clock milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Delay added after the `retry_count`-th failure.
/// Linear: 1x, 2x, 3x the unit on successive retries.
pub fn backoff_ms(retry_count: u32, unit_ms: u64) -> u64 {
    unit_ms.saturating_mul(retry_count as u64)
}

/// Fire time after a failure, advanced from the previous fire time (not from now).
pub fn next_fire_time(prev_fire_time: u64, retry_count: u32, unit_ms: u64) -> u64 {
    prev_fire_time.saturating_add(backoff_ms(retry_count, unit_ms))
}

/// Whether a failed task has used up its retries and must be dropped.
pub fn should_drop(retry_count: u32, max_retries: u32) -> bool {
    retry_count >= max_retries
}

/// Soft queue-size check for the submit-side warning. Never rejects.
pub fn over_threshold(pending: usize, threshold: usize) -> bool {
    pending > threshold
}
