//! 凭证选择器 Trait
//!
//! 两种实现共享同一契约和同一套测试：
//! - `LockedSelector`: 单把锁保护列表和游标
//! - `ConcurrentSelector`: DashMap + ArcSwap 快照 + 原子游标

use super::types::{Credential, CredentialStatus};
use crate::errors::PoolError;
use chrono::{DateTime, Utc};

/// 凭证选择器
pub trait CredentialSelector: Send + Sync {
    /// 实现名称（日志与统计使用）
    fn name(&self) -> &'static str;

    /// 整体替换内存快照
    fn replace_all(&self, credentials: Vec<Credential>);

    /// 轮询选出下一个可用凭证
    fn select_next(&self, now: DateTime<Utc>) -> Result<Credential, PoolError>;

    fn get(&self, id: &str) -> Option<Credential>;

    /// 原地更新，返回更新后的凭证；凭证不存在时返回 None
    fn update(&self, id: &str, f: &mut dyn FnMut(&mut Credential)) -> Option<Credential>;

    /// 用新凭证替换旧凭证（轮换），返回旧凭证是否存在
    fn swap(&self, old_id: &str, replacement: Credential) -> bool;

    /// 按轮询顺序返回所有凭证
    fn snapshot(&self) -> Vec<Credential>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 写入状态
    fn apply_status(
        &self,
        id: &str,
        status: CredentialStatus,
        cooldown_until: Option<DateTime<Utc>>,
        last_error: Option<String>,
    ) -> Option<Credential> {
        self.update(id, &mut |cred: &mut Credential| {
            cred.apply_status(status, cooldown_until, last_error.clone())
        })
    }

    /// 可用凭证数量（并发实现中是近似值）
    fn available_count(&self, now: DateTime<Utc>) -> usize {
        self.snapshot()
            .iter()
            .filter(|cred| cred.is_available_at(now))
            .count()
    }

    /// 冷却中凭证最早的恢复时间
    fn earliest_recovery(&self) -> Option<DateTime<Utc>> {
        self.snapshot()
            .iter()
            .filter(|cred| !cred.status.is_terminal())
            .filter_map(|cred| cred.cooldown_until)
            .min()
    }
}
