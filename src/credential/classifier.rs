//! 上游失败分类
//!
//! 根据 HTTP 状态码和响应体关键字决定凭证的后续处理。
//! 判断顺序：成功 → Provider 额度耗尽文案 → 429 → 401/403/402 → 400 预算 →
//! 无效/吊销 Key → 通用额度/账单关键字 → 5xx 与无响应 → 其它忽略。

use crate::config::{ClassifierConfig, CooldownConfig};
use relaycast_core::{CredentialStatus, ProviderType};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 轮换原因
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationReason {
    QuotaExhausted,
    AuthenticationError,
    PaymentRequired,
    BudgetExceeded,
    InvalidKey,
    /// 外部用量检查主动触发
    SpendLimit,
    Manual(String),
}

impl RotationReason {
    pub fn as_str(&self) -> &str {
        match self {
            RotationReason::QuotaExhausted => "quota_exhausted",
            RotationReason::AuthenticationError => "authentication_error",
            RotationReason::PaymentRequired => "payment_required",
            RotationReason::BudgetExceeded => "budget_exceeded",
            RotationReason::InvalidKey => "invalid_key",
            RotationReason::SpendLimit => "spend_limit",
            RotationReason::Manual(reason) => reason,
        }
    }
}

impl std::fmt::Display for RotationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 分类结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureAction {
    /// 换上备用凭证；没有备用凭证时标记耗尽
    Rotate(RotationReason),
    /// 进入暂态并冷却
    Cooldown(CredentialStatus, Duration),
    /// 请求成功，暂态凭证恢复健康
    Recover,
    Ignore,
}

const BUDGET_MARKERS: [&str; 3] = ["exceededbudget", "budget_exceeded", "over budget"];
const INVALID_KEY_MARKERS: [&str; 3] = ["invalid_api_key", "revoked", "unauthorized"];
/// 任意状态码（429 除外）下出现即视为额度耗尽
const GENERIC_QUOTA_MARKERS: [&str; 2] = ["quota", "billing"];

/// 失败分类器
#[derive(Debug, Clone)]
pub struct FailureClassifier {
    extra_quota_markers: Vec<String>,
    rate_limited_cooldown: Duration,
    error_cooldown: Duration,
}

impl FailureClassifier {
    pub fn new(classifier: &ClassifierConfig, cooldown: &CooldownConfig) -> Self {
        Self {
            extra_quota_markers: classifier
                .extra_quota_markers
                .iter()
                .map(|m| m.to_lowercase())
                .filter(|m| !m.is_empty())
                .collect(),
            rate_limited_cooldown: Duration::from_secs(cooldown.rate_limited_secs),
            error_cooldown: Duration::from_secs(cooldown.error_secs),
        }
    }

    /// 分类一次上游响应，`status == 0` 表示没有拿到响应
    pub fn classify(&self, provider: ProviderType, status: u16, body: &str) -> FailureAction {
        if (200..300).contains(&status) {
            return FailureAction::Recover;
        }

        let body_lower = body.to_lowercase();

        if self.is_quota_exhausted(provider, &body_lower) {
            return FailureAction::Rotate(RotationReason::QuotaExhausted);
        }

        match status {
            429 => {
                return FailureAction::Cooldown(
                    CredentialStatus::RateLimited,
                    self.rate_limited_cooldown,
                )
            }
            401 | 403 => return FailureAction::Rotate(RotationReason::AuthenticationError),
            402 => return FailureAction::Rotate(RotationReason::PaymentRequired),
            400 if contains_any(&body_lower, &BUDGET_MARKERS) => {
                return FailureAction::Rotate(RotationReason::BudgetExceeded)
            }
            _ => {}
        }

        if contains_any(&body_lower, &INVALID_KEY_MARKERS) {
            return FailureAction::Rotate(RotationReason::InvalidKey);
        }
        if contains_any(&body_lower, &GENERIC_QUOTA_MARKERS) {
            return FailureAction::Rotate(RotationReason::QuotaExhausted);
        }

        if status == 0 || (500..600).contains(&status) {
            return FailureAction::Cooldown(CredentialStatus::Error, self.error_cooldown);
        }

        FailureAction::Ignore
    }

    fn is_quota_exhausted(&self, provider: ProviderType, body_lower: &str) -> bool {
        provider
            .quota_markers()
            .iter()
            .any(|marker| body_lower.contains(marker))
            || self
                .extra_quota_markers
                .iter()
                .any(|marker| body_lower.contains(marker.as_str()))
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}
