//! 日志
//!
//! 初始化 tracing 订阅器，并提供 Key 与上游错误文本的脱敏工具。

use crate::config::LoggingConfig;
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::Level;

pub use relaycast_core::credential::mask_secret;

/// 初始化全局日志订阅器（重复调用会被忽略）
pub fn init(config: &LoggingConfig) {
    let level = parse_level(&config.level);
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .try_init();
}

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

static SANITIZE_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"Bearer\s+[A-Za-z0-9._-]+", "Bearer ***"),
        (r"\b(sk|fk)-[A-Za-z0-9_-]{8,}", "$1-***"),
        (
            r#"api[_-]?key["']?\s*[:=]\s*["']?[A-Za-z0-9._-]+"#,
            "api_key: ***",
        ),
        (r#"password["']?\s*[:=]\s*["']?[^\s"',}]+"#, "password: ***"),
    ]
    .into_iter()
    .filter_map(|(pattern, replacement)| Regex::new(pattern).ok().map(|re| (re, replacement)))
    .collect()
});

/// 上游错误文本脱敏
pub fn sanitize_log_message(message: &str) -> String {
    let mut sanitized = message.to_string();
    for (re, replacement) in SANITIZE_PATTERNS.iter() {
        sanitized = re.replace_all(&sanitized, *replacement).to_string();
    }
    sanitized
}

/// 截断过长的上游响应体，避免日志膨胀
pub fn truncate_for_log(message: &str, max_chars: usize) -> String {
    let mut chars = message.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

/// 客户端指纹的短哈希（不记录原文）
pub fn fingerprint_digest(fingerprint: &str) -> String {
    let digest = Sha256::digest(fingerprint.as_bytes());
    hex::encode(&digest[..6])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_bearer_token() {
        let output = sanitize_log_message("Authorization: Bearer abcDEF123._-XYZ");
        assert!(!output.contains("abcDEF123"));
        assert!(output.contains("***"));
    }

    #[test]
    fn test_sanitize_inline_key() {
        let output = sanitize_log_message("key fk-9f8e7d6c5b4a3210 was revoked");
        assert!(!output.contains("9f8e7d6c5b4a3210"));
        assert!(output.contains("fk-***"));
        assert!(output.contains("revoked"));
    }

    #[test]
    fn test_truncate_for_log() {
        assert_eq!(truncate_for_log("abcdef", 3), "abc...");
        assert_eq!(truncate_for_log("abc", 3), "abc");
    }

    #[test]
    fn test_fingerprint_digest_stable() {
        let a = fingerprint_digest("client-key-1");
        assert_eq!(a.len(), 12);
        assert_eq!(a, fingerprint_digest("client-key-1"));
        assert_ne!(a, fingerprint_digest("client-key-2"));
    }

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("DEBUG"), Level::DEBUG);
        assert_eq!(parse_level("unknown"), Level::INFO);
    }
}
