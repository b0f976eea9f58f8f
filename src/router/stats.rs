//! Router 统计

use crate::credential::PoolStatus;
use crate::persist::QueueStats;
use crate::proxy::ProxySummary;
use chrono::{DateTime, Utc};
use relaycast_core::ProviderType;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// 轮换计数
#[derive(Debug, Default)]
pub(crate) struct RotationMetrics {
    rotated: AtomicU64,
    already_rotated: AtomicU64,
    exhausted: AtomicU64,
    failed: AtomicU64,
}

impl RotationMetrics {
    pub(crate) fn record(&self, outcome: &RotationOutcome) {
        let counter = match outcome {
            RotationOutcome::Rotated(_) => &self.rotated,
            RotationOutcome::AlreadyRotated => &self.already_rotated,
            RotationOutcome::Exhausted => &self.exhausted,
            RotationOutcome::Failed(_) => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> RotationStats {
        RotationStats {
            rotated: self.rotated.load(Ordering::Relaxed),
            already_rotated: self.already_rotated.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// 一次轮换请求的结果
#[derive(Debug, Clone, PartialEq)]
pub enum RotationOutcome {
    /// 换上的新凭证 ID
    Rotated(String),
    /// 其它调用已完成轮换
    AlreadyRotated,
    /// 没有备用凭证，原凭证已标记耗尽
    Exhausted,
    /// 存储出错，原凭证已标记耗尽
    Failed(String),
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct RotationStats {
    pub rotated: u64,
    pub already_rotated: u64,
    pub exhausted: u64,
    pub failed: u64,
}

/// 单个 Provider 的统计
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProviderStats {
    #[serde(flatten)]
    pub pool: PoolStatus,
    /// 未领取的备用凭证数量；存储查询失败时为空
    pub available_backups: Option<u64>,
}

/// Router 整体统计
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RouterStats {
    pub generated_at: DateTime<Utc>,
    pub providers: BTreeMap<ProviderType, ProviderStats>,
    pub proxies: Vec<ProxySummary>,
    pub available_proxies: usize,
    /// 代理 -> 活跃凭证 ID
    pub bindings: BTreeMap<String, Vec<String>>,
    pub queue: QueueStats,
    pub rotations: RotationStats,
}

impl RouterStats {
    /// 单行摘要（定时日志使用）
    pub fn summary_line(&self) -> String {
        let providers: Vec<String> = self
            .providers
            .iter()
            .map(|(provider, stats)| {
                format!(
                    "{}={}/{} (备用 {})",
                    provider,
                    stats.pool.available,
                    stats.pool.total,
                    stats
                        .available_backups
                        .map(|n| n.to_string())
                        .unwrap_or_else(|| "?".to_string())
                )
            })
            .collect();
        format!(
            "凭证 [{}] 代理 {}/{} 队列 pending={} dropped={} 轮换 {}",
            providers.join(", "),
            self.available_proxies,
            self.proxies.len(),
            self.queue.pending,
            self.queue.dropped,
            self.rotations.rotated
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotation_metrics() {
        let metrics = RotationMetrics::default();
        metrics.record(&RotationOutcome::Rotated("b1".to_string()));
        metrics.record(&RotationOutcome::AlreadyRotated);
        metrics.record(&RotationOutcome::Exhausted);
        metrics.record(&RotationOutcome::Exhausted);
        assert_eq!(
            metrics.snapshot(),
            RotationStats {
                rotated: 1,
                already_rotated: 1,
                exhausted: 2,
                failed: 0,
            }
        );
    }
}
