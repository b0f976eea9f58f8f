//! 出口代理池
//!
//! 代理列表放在 `SlotList` 中轮询；每个代理的 HTTP 客户端按 ID 缓存，
//! 连接配置指纹变化或代理被移除时重建。

use super::client_factory::ProxyClientFactory;
use crate::config::TransportConfig;
use crate::errors::ProxyError;
use crate::persist::{PersistQueue, PersistTask};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use relaycast_core::slots::SlotList;
use relaycast_core::{
    Proxy, ProxyHealthLog, ProxyHealthUpdate, ProxyKind, ProxyStatus, SharedClock, Store,
    StoreError, StoreResult,
};
use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// 代理状态摘要（不含账号密码）
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProxySummary {
    pub id: String,
    pub name: String,
    pub kind: ProxyKind,
    pub endpoint: String,
    pub status: ProxyStatus,
    pub fail_count: u32,
    pub last_latency_ms: Option<u64>,
    pub last_error: Option<String>,
    pub last_checked_at: Option<DateTime<Utc>>,
}

impl From<&Proxy> for ProxySummary {
    fn from(proxy: &Proxy) -> Self {
        Self {
            id: proxy.id.clone(),
            name: proxy.name.clone(),
            kind: proxy.kind,
            endpoint: proxy.endpoint(),
            status: proxy.status,
            fail_count: proxy.fail_count,
            last_latency_ms: proxy.last_latency_ms,
            last_error: proxy.last_error.clone(),
            last_checked_at: proxy.last_checked_at,
        }
    }
}

struct CachedClient {
    fingerprint: String,
    client: Client,
}

/// 出口代理池
pub struct ProxyPool {
    proxies: SlotList<Proxy>,
    clients: DashMap<String, CachedClient>,
    direct: Client,
    factory: ProxyClientFactory,
    store: Arc<dyn Store>,
    persist: PersistQueue,
    clock: SharedClock,
    load_timeout: Duration,
}

impl ProxyPool {
    pub fn new(
        store: Arc<dyn Store>,
        persist: PersistQueue,
        clock: SharedClock,
        transport: &TransportConfig,
        load_timeout: Duration,
    ) -> Result<Self, ProxyError> {
        let factory = ProxyClientFactory::new(transport);
        let direct = factory.create_direct_client()?;
        Ok(Self {
            proxies: SlotList::new(),
            clients: DashMap::new(),
            direct,
            factory,
            store,
            persist,
            clock,
            load_timeout,
        })
    }

    /// 从存储整体重新加载活跃代理
    pub async fn load_from_store(&self) -> StoreResult<usize> {
        let proxies = tokio::time::timeout(self.load_timeout, self.store.find_proxies())
            .await
            .map_err(|_| StoreError::Timeout("find_proxies".to_string()))??;
        let active: Vec<Proxy> = proxies.into_iter().filter(|p| p.active).collect();
        let count = active.len();
        self.replace_all(active);
        tracing::info!("[ProxyPool] 已加载 {} 个代理", count);
        Ok(count)
    }

    /// 替换代理列表，清理已移除或配置变化的客户端缓存
    pub fn replace_all(&self, proxies: Vec<Proxy>) {
        self.proxies.replace_all(proxies);
        self.clients.retain(|id, cached| {
            let keep = self
                .proxies
                .get(id)
                .map(|proxy| proxy.config_fingerprint() == cached.fingerprint)
                .unwrap_or(false);
            if !keep {
                tracing::debug!("[ProxyPool] 丢弃代理 {} 的缓存客户端", id);
            }
            keep
        });
    }

    /// 轮询选出下一个可用代理
    pub fn select_proxy(&self) -> Option<Proxy> {
        self.proxies
            .select_next(|proxy| proxy.is_available())
            .map(|proxy| Proxy::clone(&proxy))
    }

    /// 代理对应的客户端（带缓存）
    pub fn client_for(&self, proxy: &Proxy) -> Result<Client, ProxyError> {
        let fingerprint = proxy.config_fingerprint();
        if let Some(cached) = self.clients.get(&proxy.id) {
            if cached.fingerprint == fingerprint {
                return Ok(cached.client.clone());
            }
        }

        let client = self.factory.create_client(proxy)?;
        tracing::debug!(
            "[ProxyPool] 为代理 {} ({} {}) 创建客户端",
            proxy.id,
            proxy.kind,
            proxy.endpoint()
        );
        self.clients.insert(
            proxy.id.clone(),
            CachedClient {
                fingerprint,
                client: client.clone(),
            },
        );
        Ok(client)
    }

    /// 直连客户端
    pub fn direct_client(&self) -> Client {
        self.direct.clone()
    }

    pub fn get(&self, id: &str) -> Option<Proxy> {
        self.proxies.get(id).map(|proxy| Proxy::clone(&proxy))
    }

    pub fn snapshot(&self) -> Vec<Proxy> {
        self.proxies
            .snapshot()
            .into_iter()
            .map(|proxy| Proxy::clone(&proxy))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    pub fn available_count(&self) -> usize {
        self.proxies
            .snapshot()
            .iter()
            .filter(|proxy| proxy.is_available())
            .count()
    }

    pub fn cached_client_count(&self) -> usize {
        self.clients.len()
    }

    /// 记录一次探测成功：失败计数清零，立即恢复健康
    pub async fn record_probe_success(&self, id: &str, latency_ms: u64) -> Option<Proxy> {
        let now = self.clock.now();
        let mut was_unhealthy = false;
        let updated = self.proxies.update(id, &mut |proxy: &mut Proxy| {
            was_unhealthy = proxy.status == ProxyStatus::Unhealthy;
            proxy.record_probe_success(latency_ms, now);
        })?;
        if was_unhealthy {
            tracing::info!(
                "[ProxyPool] 代理 {} 已恢复 (延迟 {}ms)",
                updated.name,
                latency_ms
            );
        }
        let updated = Proxy::clone(&updated);
        self.persist_probe(&updated, true, Some(latency_ms), None, now)
            .await;
        Some(updated)
    }

    /// 记录一次探测失败：达到阈值时标记为不健康
    pub async fn record_probe_failure(
        &self,
        id: &str,
        error: &str,
        threshold: u32,
        latency_ms: Option<u64>,
    ) -> Option<Proxy> {
        let now = self.clock.now();
        let mut became_unhealthy = false;
        let updated = self.proxies.update(id, &mut |proxy: &mut Proxy| {
            became_unhealthy = proxy.record_probe_failure(error, threshold, now);
        })?;
        if became_unhealthy {
            tracing::warn!(
                "[ProxyPool] 代理 {} 连续失败 {} 次，标记为不健康: {}",
                updated.name,
                updated.fail_count,
                error
            );
        } else {
            tracing::debug!(
                "[ProxyPool] 代理 {} 探测失败 ({}/{}): {}",
                updated.name,
                updated.fail_count,
                threshold,
                error
            );
        }
        let updated = Proxy::clone(&updated);
        self.persist_probe(&updated, false, latency_ms, Some(error), now)
            .await;
        Some(updated)
    }

    async fn persist_probe(
        &self,
        proxy: &Proxy,
        success: bool,
        latency_ms: Option<u64>,
        error: Option<&str>,
        now: DateTime<Utc>,
    ) {
        self.persist
            .submit(PersistTask::HealthLog(ProxyHealthLog {
                proxy_id: proxy.id.clone(),
                outcome: proxy.probe_outcome(success),
                latency_ms,
                error_message: error.map(str::to_string),
                checked_at: now,
            }))
            .await;
        self.persist
            .submit(PersistTask::ProxyHealth {
                proxy_id: proxy.id.clone(),
                update: ProxyHealthUpdate::from_proxy(proxy),
            })
            .await;
    }

    pub fn status(&self) -> Vec<ProxySummary> {
        self.proxies
            .snapshot()
            .iter()
            .map(|proxy| ProxySummary::from(proxy.as_ref()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PersistConfig;
    use relaycast_core::{MemoryStore, ProbeOutcome, SystemClock};

    async fn create_pool(proxies: Vec<Proxy>) -> (ProxyPool, Arc<MemoryStore>, PersistQueue) {
        let store = Arc::new(MemoryStore::new());
        for proxy in &proxies {
            store.insert_proxy(proxy).await.unwrap();
        }
        let queue = PersistQueue::new(store.clone(), &PersistConfig::default());
        queue.start();
        let pool = ProxyPool::new(
            store.clone(),
            queue.clone(),
            SystemClock::shared(),
            &TransportConfig::default(),
            Duration::from_secs(5),
        )
        .unwrap();
        pool.load_from_store().await.unwrap();
        (pool, store, queue)
    }

    fn proxy(id: &str) -> Proxy {
        Proxy::new(id, ProxyKind::Http, "127.0.0.1", 3128)
    }

    #[tokio::test]
    async fn test_inactive_proxies_not_loaded() {
        let mut inactive = proxy("p2");
        inactive.active = false;
        let (pool, _store, queue) = create_pool(vec![proxy("p1"), inactive]).await;
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.select_proxy().unwrap().id, "p1");
        queue.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_select_skips_unhealthy() {
        let (pool, _store, queue) =
            create_pool(vec![proxy("p1"), proxy("p2"), proxy("p3")]).await;
        for _ in 0..3 {
            pool.record_probe_failure("p2", "connection refused", 3, None)
                .await;
        }
        let picks: Vec<String> = (0..4).map(|_| pool.select_proxy().unwrap().id).collect();
        assert!(!picks.contains(&"p2".to_string()));
        assert_eq!(pool.available_count(), 2);
        queue.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_failure_threshold_and_recovery() {
        let (pool, store, queue) = create_pool(vec![proxy("p1")]).await;
        pool.record_probe_success("p1", 40).await;

        pool.record_probe_failure("p1", "timeout", 3, None).await;
        let after_two = pool
            .record_probe_failure("p1", "timeout", 3, None)
            .await
            .unwrap();
        assert_eq!(after_two.status, ProxyStatus::Healthy);
        assert_eq!(after_two.fail_count, 2);

        let after_three = pool
            .record_probe_failure("p1", "timeout", 3, None)
            .await
            .unwrap();
        assert_eq!(after_three.status, ProxyStatus::Unhealthy);

        let recovered = pool.record_probe_success("p1", 55).await.unwrap();
        assert_eq!(recovered.status, ProxyStatus::Healthy);
        assert_eq!(recovered.fail_count, 0);

        assert!(queue.wait_idle(Duration::from_secs(2)).await);
        let logs = store.health_logs_snapshot();
        assert_eq!(logs.len(), 5);
        assert_eq!(logs[3].outcome, ProbeOutcome::Unhealthy);
        assert_eq!(store.proxies_snapshot()[0].status, ProxyStatus::Healthy);
        queue.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_client_cache_invalidated_on_config_change() {
        let (pool, _store, queue) = create_pool(vec![proxy("p1"), proxy("p2")]).await;
        let p1 = pool.get("p1").unwrap();
        let p2 = pool.get("p2").unwrap();
        pool.client_for(&p1).unwrap();
        pool.client_for(&p2).unwrap();
        assert_eq!(pool.cached_client_count(), 2);

        // p1 换端口，p2 被移除
        let mut moved = proxy("p1");
        moved.port = 3129;
        pool.replace_all(vec![moved]);
        assert_eq!(pool.cached_client_count(), 0);

        let p1 = pool.get("p1").unwrap();
        pool.client_for(&p1).unwrap();
        pool.client_for(&p1).unwrap();
        assert_eq!(pool.cached_client_count(), 1);
        queue.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_unknown_proxy_probe_is_noop() {
        let (pool, _store, queue) = create_pool(vec![]).await;
        assert!(pool.record_probe_success("missing", 10).await.is_none());
        assert!(pool.select_proxy().is_none());
        queue.shutdown(Duration::from_secs(1)).await;
    }
}
