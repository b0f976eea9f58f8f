//! 凭证相关类型定义
//!
//! 定义凭证、凭证状态、用量计数和备用凭证等核心类型

use crate::ProviderType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 凭证状态
///
/// `Exhausted` / `NeedsRefresh` 为终态，冷却到期也不会恢复；
/// `RateLimited` / `Error` 为暂态，`cooldown_until` 过后自动可选。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialStatus {
    Healthy,
    RateLimited,
    Exhausted,
    NeedsRefresh,
    Error,
}

impl CredentialStatus {
    pub const ALL: [CredentialStatus; 5] = [
        CredentialStatus::Healthy,
        CredentialStatus::RateLimited,
        CredentialStatus::Exhausted,
        CredentialStatus::NeedsRefresh,
        CredentialStatus::Error,
    ];

    /// 是否为终态（只能通过轮换或显式写入改变）
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CredentialStatus::Exhausted | CredentialStatus::NeedsRefresh
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialStatus::Healthy => "healthy",
            CredentialStatus::RateLimited => "rate_limited",
            CredentialStatus::Exhausted => "exhausted",
            CredentialStatus::NeedsRefresh => "needs_refresh",
            CredentialStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for CredentialStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CredentialStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "healthy" | "active" => Ok(CredentialStatus::Healthy),
            "rate_limited" => Ok(CredentialStatus::RateLimited),
            "exhausted" => Ok(CredentialStatus::Exhausted),
            "needs_refresh" | "need_refresh" => Ok(CredentialStatus::NeedsRefresh),
            "error" => Ok(CredentialStatus::Error),
            _ => Err(format!("Invalid credential status: {s}")),
        }
    }
}

/// 凭证用量计数
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct CredentialUsage {
    /// 累计 token 数
    pub tokens_used: u64,
    /// 累计请求数
    pub requests_count: u64,
}

impl CredentialUsage {
    /// 记录一次请求
    pub fn record(&mut self, tokens: u64) {
        self.tokens_used = self.tokens_used.saturating_add(tokens);
        self.requests_count = self.requests_count.saturating_add(1);
    }
}

/// 凭证 - 表示单个上游 API Key
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Credential {
    /// 唯一标识符
    pub id: String,
    /// 上游 API Key
    pub secret: String,
    /// 所属 Provider 类型
    pub provider: ProviderType,
    /// 当前状态
    pub status: CredentialStatus,
    /// 冷却结束时间（仅暂态有意义）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_until: Option<DateTime<Utc>>,
    /// 最近一次错误
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// 创建时间
    pub created_at: DateTime<Utc>,
    /// 用量计数
    #[serde(default)]
    pub usage: CredentialUsage,
}

impl Credential {
    /// 创建新的健康凭证
    pub fn new(id: impl Into<String>, secret: impl Into<String>, provider: ProviderType) -> Self {
        Self {
            id: id.into(),
            secret: secret.into(),
            provider,
            status: CredentialStatus::Healthy,
            cooldown_until: None,
            last_error: None,
            created_at: Utc::now(),
            usage: CredentialUsage::default(),
        }
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// 由备用凭证生成新凭证：沿用备用凭证的 ID 和 Key，状态健康，计数清零
    pub fn from_backup(backup: &BackupCredential, now: DateTime<Utc>) -> Self {
        Self {
            id: backup.id.clone(),
            secret: backup.secret.clone(),
            provider: backup.provider,
            status: CredentialStatus::Healthy,
            cooldown_until: None,
            last_error: None,
            created_at: now,
            usage: CredentialUsage::default(),
        }
    }

    /// 在给定时刻是否可选
    ///
    /// 暂态没有冷却时间时视为不可选。
    pub fn is_available_at(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            CredentialStatus::Healthy => true,
            CredentialStatus::Exhausted | CredentialStatus::NeedsRefresh => false,
            CredentialStatus::RateLimited | CredentialStatus::Error => {
                self.cooldown_until.map(|until| now > until).unwrap_or(false)
            }
        }
    }

    /// 写入状态
    pub fn apply_status(
        &mut self,
        status: CredentialStatus,
        cooldown_until: Option<DateTime<Utc>>,
        last_error: Option<String>,
    ) {
        self.status = status;
        self.cooldown_until = if status.is_terminal() || status == CredentialStatus::Healthy {
            None
        } else {
            cooldown_until
        };
        if status == CredentialStatus::Healthy {
            self.last_error = None;
        } else if last_error.is_some() {
            self.last_error = last_error;
        }
    }

    /// 脱敏后的 Key（日志使用）
    pub fn masked_secret(&self) -> String {
        mask_secret(&self.secret)
    }
}

/// 备用凭证 - 轮换时用来替换失效凭证
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackupCredential {
    pub id: String,
    pub secret: String,
    pub provider: ProviderType,
    /// 是否已被领取（只会从 false 变为 true 一次）
    pub used: bool,
    pub used_at: Option<DateTime<Utc>>,
    /// 被哪个失效凭证领取
    pub used_for: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl BackupCredential {
    pub fn new(id: impl Into<String>, secret: impl Into<String>, provider: ProviderType) -> Self {
        Self {
            id: id.into(),
            secret: secret.into(),
            provider,
            used: false,
            used_at: None,
            used_for: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// 标记为已领取
    pub fn claim(&mut self, used_for: &str, now: DateTime<Utc>) {
        self.used = true;
        self.used_at = Some(now);
        self.used_for = Some(used_for.to_string());
    }
}

/// Key 脱敏：保留前 8 位和后 4 位
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 12 {
        return "****".to_string();
    }
    let head: String = chars[..8].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}

#[cfg(test)]
mod type_tests {
    use super::*;
    use chrono::Duration;

    fn create_test_credential(id: &str) -> Credential {
        Credential::new(id, format!("sk-test-{id}-0123456789"), ProviderType::Factory)
    }

    #[test]
    fn test_healthy_is_available() {
        let cred = create_test_credential("a");
        assert!(cred.is_available_at(Utc::now()));
    }

    #[test]
    fn test_terminal_never_available() {
        let now = Utc::now();
        for status in [CredentialStatus::Exhausted, CredentialStatus::NeedsRefresh] {
            let mut cred = create_test_credential("a");
            cred.status = status;
            cred.cooldown_until = Some(now - Duration::days(1));
            assert!(!cred.is_available_at(now));
            assert!(!cred.is_available_at(now + Duration::days(365)));
        }
    }

    #[test]
    fn test_transient_available_after_cooldown() {
        let now = Utc::now();
        let mut cred = create_test_credential("a");
        cred.apply_status(
            CredentialStatus::RateLimited,
            Some(now + Duration::seconds(60)),
            Some("429".to_string()),
        );
        assert!(!cred.is_available_at(now));
        assert!(!cred.is_available_at(now + Duration::seconds(60)));
        assert!(cred.is_available_at(now + Duration::seconds(61)));
        // 状态字段不需要写回
        assert_eq!(cred.status, CredentialStatus::RateLimited);
    }

    #[test]
    fn test_transient_without_cooldown_unavailable() {
        let mut cred = create_test_credential("a");
        cred.status = CredentialStatus::Error;
        cred.cooldown_until = None;
        assert!(!cred.is_available_at(Utc::now()));
    }

    #[test]
    fn test_apply_status_clears_cooldown_on_terminal() {
        let now = Utc::now();
        let mut cred = create_test_credential("a");
        cred.apply_status(
            CredentialStatus::Exhausted,
            Some(now + Duration::hours(24)),
            Some("quota".to_string()),
        );
        assert_eq!(cred.cooldown_until, None);
        assert_eq!(cred.last_error.as_deref(), Some("quota"));

        cred.apply_status(CredentialStatus::Healthy, None, None);
        assert_eq!(cred.last_error, None);
    }

    #[test]
    fn test_from_backup_resets_counters() {
        let backup = BackupCredential::new("b-1", "sk-backup-secret-xyz", ProviderType::OpenHands);
        let cred = Credential::from_backup(&backup, Utc::now());
        assert_eq!(cred.id, "b-1");
        assert_eq!(cred.secret, "sk-backup-secret-xyz");
        assert_eq!(cred.status, CredentialStatus::Healthy);
        assert_eq!(cred.usage, CredentialUsage::default());
    }

    #[test]
    fn test_usage_record() {
        let mut usage = CredentialUsage::default();
        usage.record(120);
        usage.record(30);
        assert_eq!(usage.tokens_used, 150);
        assert_eq!(usage.requests_count, 2);
    }

    #[test]
    fn test_mask_secret() {
        assert_eq!(mask_secret("fk-1234567890abcdef"), "fk-12345...cdef");
        assert_eq!(mask_secret("short"), "****");
    }

    #[test]
    fn test_status_str_roundtrip() {
        use std::str::FromStr;
        for status in CredentialStatus::ALL {
            assert_eq!(CredentialStatus::from_str(status.as_str()), Ok(status));
        }
    }
}
