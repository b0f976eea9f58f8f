//! 凭证池
//!
//! 包装一个 `CredentialSelector`：读写内存快照同步完成，
//! 存储写入交给 `PersistQueue` 异步执行。

use crate::config::CooldownConfig;
use crate::persist::{PersistQueue, PersistTask};
use chrono::{DateTime, Utc};
use relaycast_core::{
    Credential, CredentialSelector, CredentialStatus, CredentialStatusUpdate, PoolError,
    ProviderType, SharedClock, Store, StoreError, StoreResult,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// 单个凭证的状态摘要（Key 已脱敏）
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CredentialSummary {
    pub id: String,
    pub masked_secret: String,
    pub status: CredentialStatus,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub tokens_used: u64,
    pub requests_count: u64,
}

impl From<&Credential> for CredentialSummary {
    fn from(cred: &Credential) -> Self {
        Self {
            id: cred.id.clone(),
            masked_secret: cred.masked_secret(),
            status: cred.status,
            cooldown_until: cred.cooldown_until,
            last_error: cred.last_error.clone(),
            tokens_used: cred.usage.tokens_used,
            requests_count: cred.usage.requests_count,
        }
    }
}

/// 凭证池状态
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PoolStatus {
    pub provider: ProviderType,
    pub selector: &'static str,
    pub total: usize,
    pub available: usize,
    /// 状态 -> 数量
    pub by_status: BTreeMap<String, usize>,
    pub earliest_recovery: Option<DateTime<Utc>>,
    pub credentials: Vec<CredentialSummary>,
}

/// 凭证池 - 单个 Provider 的凭证集合
pub struct CredentialPool {
    provider: ProviderType,
    selector: Arc<dyn CredentialSelector>,
    store: Arc<dyn Store>,
    persist: PersistQueue,
    clock: SharedClock,
    cooldown: CooldownConfig,
    load_timeout: Duration,
}

impl CredentialPool {
    pub fn new(
        provider: ProviderType,
        selector: Arc<dyn CredentialSelector>,
        store: Arc<dyn Store>,
        persist: PersistQueue,
        clock: SharedClock,
        cooldown: CooldownConfig,
        load_timeout: Duration,
    ) -> Self {
        Self {
            provider,
            selector,
            store,
            persist,
            clock,
            cooldown,
            load_timeout,
        }
    }

    pub fn provider(&self) -> ProviderType {
        self.provider
    }

    pub fn selector_name(&self) -> &'static str {
        self.selector.name()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// 从存储整体重新加载（替换，不合并）
    pub async fn load_all(&self) -> StoreResult<usize> {
        let credentials = tokio::time::timeout(
            self.load_timeout,
            self.store.find_credentials(self.provider),
        )
        .await
        .map_err(|_| StoreError::Timeout("find_credentials".to_string()))??;

        let count = credentials.len();
        self.selector.replace_all(credentials);
        tracing::info!(
            "[CredentialPool] {} 已加载 {} 个凭证 (selector={})",
            self.provider,
            count,
            self.selector.name()
        );
        Ok(count)
    }

    /// 轮询选出下一个可用凭证
    pub fn select_next(&self) -> Result<Credential, PoolError> {
        let result = self.selector.select_next(self.clock.now());
        if result.is_err() {
            tracing::debug!(
                "[CredentialPool] {} 没有可用凭证 (共 {} 个)",
                self.provider,
                self.selector.len()
            );
        }
        result
    }

    pub fn get(&self, id: &str) -> Option<Credential> {
        self.selector.get(id)
    }

    /// 凭证当前是否可选
    pub fn is_available(&self, id: &str) -> bool {
        let now = self.clock.now();
        self.selector
            .get(id)
            .map(|cred| cred.is_available_at(now))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.selector.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selector.is_empty()
    }

    pub fn snapshot(&self) -> Vec<Credential> {
        self.selector.snapshot()
    }

    pub fn earliest_recovery(&self) -> Option<DateTime<Utc>> {
        self.selector.earliest_recovery()
    }

    /// 写入状态：内存同步更新，存储异步写入
    ///
    /// 返回更新后的凭证；凭证不在池中时返回 None 且不写存储。
    pub async fn mark_status(
        &self,
        id: &str,
        status: CredentialStatus,
        cooldown: Option<Duration>,
        last_error: Option<String>,
    ) -> Option<Credential> {
        let now = self.clock.now();
        let cooldown_until = cooldown.map(|d| cooldown_deadline(now, d));
        let updated = match self
            .selector
            .apply_status(id, status, cooldown_until, last_error)
        {
            Some(updated) => updated,
            None => {
                tracing::debug!(
                    "[CredentialPool] {} 凭证 {} 不在池中，忽略状态 {}",
                    self.provider,
                    id,
                    status
                );
                return None;
            }
        };

        self.persist
            .submit(PersistTask::CredentialStatus {
                provider: self.provider,
                id: id.to_string(),
                update: CredentialStatusUpdate::from_credential(&updated, now),
            })
            .await;
        Some(updated)
    }

    pub async fn mark_healthy(&self, id: &str) -> Option<Credential> {
        self.mark_status(id, CredentialStatus::Healthy, None, None)
            .await
    }

    /// 429 冷却
    pub async fn mark_rate_limited(&self, id: &str, last_error: Option<String>) -> Option<Credential> {
        let cooldown = Duration::from_secs(self.cooldown.rate_limited_secs);
        tracing::info!(
            "[CredentialPool] {} 凭证 {} 被限流，冷却 {:?}",
            self.provider,
            id,
            cooldown
        );
        self.mark_status(id, CredentialStatus::RateLimited, Some(cooldown), last_error)
            .await
    }

    /// 一般错误冷却
    pub async fn mark_error(&self, id: &str, last_error: Option<String>) -> Option<Credential> {
        let cooldown = Duration::from_secs(self.cooldown.error_secs);
        self.mark_status(id, CredentialStatus::Error, Some(cooldown), last_error)
            .await
    }

    pub async fn mark_exhausted(&self, id: &str, last_error: Option<String>) -> Option<Credential> {
        tracing::warn!("[CredentialPool] {} 凭证 {} 标记为耗尽", self.provider, id);
        self.mark_status(id, CredentialStatus::Exhausted, None, last_error)
            .await
    }

    pub async fn mark_needs_refresh(
        &self,
        id: &str,
        last_error: Option<String>,
    ) -> Option<Credential> {
        tracing::warn!("[CredentialPool] {} 凭证 {} 需要刷新", self.provider, id);
        self.mark_status(id, CredentialStatus::NeedsRefresh, None, last_error)
            .await
    }

    /// 记录一次请求的用量
    pub async fn record_usage(&self, id: &str, tokens: u64) -> bool {
        let updated = self
            .selector
            .update(id, &mut |cred: &mut Credential| cred.usage.record(tokens));
        if updated.is_none() {
            return false;
        }
        self.persist
            .submit(PersistTask::CredentialUsage {
                provider: self.provider,
                id: id.to_string(),
                tokens,
                requests: 1,
            })
            .await;
        true
    }

    /// 轮换后替换内存中的凭证，保持轮询位置
    pub(crate) fn swap_in(&self, old_id: &str, replacement: Credential) -> bool {
        self.selector.swap(old_id, replacement)
    }

    /// 只改内存状态，不写存储（存储已由调用方写好）
    pub(crate) fn apply_local_status(
        &self,
        id: &str,
        status: CredentialStatus,
        last_error: Option<String>,
    ) -> Option<Credential> {
        self.selector.apply_status(id, status, None, last_error)
    }

    pub fn status(&self) -> PoolStatus {
        let now = self.clock.now();
        let credentials = self.selector.snapshot();
        let mut by_status = BTreeMap::new();
        for status in CredentialStatus::ALL {
            by_status.insert(status.as_str().to_string(), 0);
        }
        for cred in &credentials {
            *by_status.entry(cred.status.as_str().to_string()).or_insert(0) += 1;
        }

        PoolStatus {
            provider: self.provider,
            selector: self.selector.name(),
            total: credentials.len(),
            available: credentials
                .iter()
                .filter(|cred| cred.is_available_at(now))
                .count(),
            by_status,
            earliest_recovery: self.selector.earliest_recovery(),
            credentials: credentials.iter().map(CredentialSummary::from).collect(),
        }
    }
}

/// 冷却截止时间
fn cooldown_deadline(now: DateTime<Utc>, cooldown: Duration) -> DateTime<Utc> {
    let millis = i64::try_from(cooldown.as_millis()).unwrap_or(i64::MAX / 2);
    now + chrono::Duration::milliseconds(millis)
}
