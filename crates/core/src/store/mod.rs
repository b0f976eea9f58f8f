//! 持久化存储 Trait
//!
//! 只要求文档型存储都具备的能力：批量查询、单条查询、插入、
//! 删除并返回影响行数、按条件更新 / 自增、计数。
//! 轮换依赖其中两条语义：带影响行数的删除（幂等保护）和
//! 原子的"查找并领取"备用凭证。

mod memory;

pub use memory::MemoryStore;

use crate::binding::Binding;
use crate::credential::{BackupCredential, Credential, CredentialStatus};
use crate::errors::StoreResult;
use crate::proxy::{Proxy, ProxyHealthLog, ProxyStatus};
use crate::ProviderType;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 凭证状态写入
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialStatusUpdate {
    pub status: CredentialStatus,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl CredentialStatusUpdate {
    /// 取凭证当前的状态字段
    pub fn from_credential(credential: &Credential, updated_at: DateTime<Utc>) -> Self {
        Self {
            status: credential.status,
            cooldown_until: credential.cooldown_until,
            last_error: credential.last_error.clone(),
            updated_at,
        }
    }
}

/// 代理健康字段写入
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyHealthUpdate {
    pub status: ProxyStatus,
    pub fail_count: u32,
    pub last_latency_ms: Option<u64>,
    pub last_error: Option<String>,
    pub last_checked_at: Option<DateTime<Utc>>,
}

impl ProxyHealthUpdate {
    pub fn from_proxy(proxy: &Proxy) -> Self {
        Self {
            status: proxy.status,
            fail_count: proxy.fail_count,
            last_latency_ms: proxy.last_latency_ms,
            last_error: proxy.last_error.clone(),
            last_checked_at: proxy.last_checked_at,
        }
    }
}

/// 持久化存储
#[async_trait]
pub trait Store: Send + Sync {
    // ------------------------------------------------------------------
    // 凭证
    // ------------------------------------------------------------------

    /// 按创建时间顺序返回该 Provider 的全部凭证
    async fn find_credentials(&self, provider: ProviderType) -> StoreResult<Vec<Credential>>;

    async fn find_credential(
        &self,
        provider: ProviderType,
        id: &str,
    ) -> StoreResult<Option<Credential>>;

    /// ID 已存在时返回 `StoreError::Conflict`
    async fn insert_credential(&self, credential: &Credential) -> StoreResult<()>;

    /// 返回实际删除的条数
    async fn delete_credential(&self, provider: ProviderType, id: &str) -> StoreResult<u64>;

    async fn update_credential_status(
        &self,
        provider: ProviderType,
        id: &str,
        update: &CredentialStatusUpdate,
    ) -> StoreResult<u64>;

    async fn increment_credential_usage(
        &self,
        provider: ProviderType,
        id: &str,
        tokens: u64,
        requests: u64,
    ) -> StoreResult<u64>;

    async fn count_credentials(
        &self,
        provider: ProviderType,
        status: Option<CredentialStatus>,
    ) -> StoreResult<u64>;

    // ------------------------------------------------------------------
    // 备用凭证
    // ------------------------------------------------------------------

    async fn insert_backup(&self, backup: &BackupCredential) -> StoreResult<()>;

    /// 查看最早的一条未领取备用凭证（不领取）
    async fn find_available_backup(
        &self,
        provider: ProviderType,
    ) -> StoreResult<Option<BackupCredential>>;

    /// 原子地领取一条未领取备用凭证
    ///
    /// 查找与 `used = false -> true` 必须是一次操作，
    /// 并发调用绝不会领到同一条。领取后不可撤销。
    async fn claim_backup(
        &self,
        provider: ProviderType,
        used_for: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<BackupCredential>>;

    async fn count_available_backups(&self, provider: ProviderType) -> StoreResult<u64>;

    // ------------------------------------------------------------------
    // 代理
    // ------------------------------------------------------------------

    async fn find_proxies(&self) -> StoreResult<Vec<Proxy>>;

    async fn insert_proxy(&self, proxy: &Proxy) -> StoreResult<()>;

    async fn update_proxy_health(&self, id: &str, update: &ProxyHealthUpdate) -> StoreResult<u64>;

    async fn insert_health_log(&self, log: &ProxyHealthLog) -> StoreResult<()>;

    /// 最近的健康日志（新的在前）
    async fn find_health_logs(
        &self,
        proxy_id: &str,
        limit: usize,
    ) -> StoreResult<Vec<ProxyHealthLog>>;

    // ------------------------------------------------------------------
    // 绑定
    // ------------------------------------------------------------------

    async fn find_bindings(&self) -> StoreResult<Vec<Binding>>;

    async fn insert_binding(&self, binding: &Binding) -> StoreResult<()>;

    /// 批量把绑定从旧凭证改指向新凭证
    async fn repoint_bindings(&self, from_credential: &str, to_credential: &str)
        -> StoreResult<u64>;
}
