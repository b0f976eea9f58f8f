//! 调用方重试策略
//!
//! 首次请求失败后最多再试 `max_extra_attempts` 次；流式响应一旦开始就不再重试。

use crate::config::RetryConfig;
use std::time::Duration;

/// 只有这类连接错误值得重试，代理端超时造成的 EOF 不在其中
const RETRYABLE_TRANSPORT_MARKERS: [&str; 5] = [
    "connection reset",
    "connection refused",
    "no such host",
    "tls handshake",
    "broken pipe",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_extra_attempts: u32,
    base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            max_extra_attempts: config.max_extra_attempts,
            base_delay: Duration::from_millis(config.base_delay_ms),
        }
    }

    /// 已完成 `attempts_made` 次尝试后是否还能再试
    pub fn should_retry(&self, attempts_made: u32, stream_started: bool) -> bool {
        !stream_started && attempts_made <= self.max_extra_attempts
    }

    /// 第 `attempts_made` 次尝试失败后的等待时间（指数退避）
    pub fn backoff(&self, attempts_made: u32) -> Duration {
        let exponent = attempts_made.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }

    /// 传输层错误是否值得重试
    pub fn is_retryable_transport_error(message: &str) -> bool {
        let lower = message.to_lowercase();
        RETRYABLE_TRANSPORT_MARKERS
            .iter()
            .any(|marker| lower.contains(marker))
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_extra_attempts + 1
    }
}
