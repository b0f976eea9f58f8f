//! 路由
//!
//! 组合凭证池、代理池、绑定索引、健康探测与轮换，对外提供：
//! - `acquire`: 为一次上游请求选出 (代理, 凭证) 和对应客户端
//! - `report_outcome`: 上报上游结果，按分类冷却、恢复或轮换
//! - `reload` / `stats` / `shutdown`
//!
//! Router 显式构造并克隆给各处理器使用，内部全部是 `Arc`。

mod retry;
mod stats;

pub use retry::RetryPolicy;
pub use stats::{ProviderStats, RotationOutcome, RotationStats, RouterStats};

use crate::config::{RelayConfig, SelectorKind};
use crate::credential::{
    CredentialPool, FailureAction, FailureClassifier, RotationCoordinator, RotationReason,
};
use crate::errors::{RotationError, RouterError};
use crate::logger::{fingerprint_digest, sanitize_log_message, truncate_for_log};
use crate::persist::PersistQueue;
use crate::proxy::{HealthProbe, ProxyChecker, ProxyPool};
use parking_lot::Mutex;
use relaycast_core::{
    BindingIndex, BindingResolution, ConcurrentSelector, Credential, CredentialSelector,
    CredentialStatus, LockedSelector, ProviderType, Proxy, SharedClock, Store, SystemClock,
};
use reqwest::Client;
use stats::RotationMetrics;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// 写入错误信息时保留的响应体长度
const ERROR_BODY_LOG_CHARS: usize = 200;
/// 关闭时等待写入队列清空的时间
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// 一次选择的结果
#[derive(Debug, Clone)]
pub struct Acquisition {
    /// 经选中代理（或直连）的客户端
    pub client: Client,
    /// 选中的代理；直连时为空
    pub proxy: Option<Proxy>,
    pub credential: Credential,
    /// 凭证来自绑定时的绑定信息
    pub binding: Option<BindingResolution>,
}

struct RouterInner {
    config: RelayConfig,
    store: Arc<dyn Store>,
    pools: HashMap<ProviderType, Arc<CredentialPool>>,
    proxies: Arc<ProxyPool>,
    bindings: Arc<BindingIndex>,
    rotation: RotationCoordinator,
    classifier: FailureClassifier,
    retry: RetryPolicy,
    persist: PersistQueue,
    health: HealthProbe,
    rotation_metrics: RotationMetrics,
    clock: SharedClock,
    cancel_token: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// 路由器
#[derive(Clone)]
pub struct Router {
    inner: Arc<RouterInner>,
}

impl Router {
    /// 构造并启动路由器：加载数据、启动写入队列、健康探测和定时重新加载
    pub async fn init(store: Arc<dyn Store>, config: RelayConfig) -> Result<Self, RouterError> {
        Self::init_with(store, config, SystemClock::shared(), None).await
    }

    /// 可注入时钟与探测实现的构造方式
    pub async fn init_with(
        store: Arc<dyn Store>,
        config: RelayConfig,
        clock: SharedClock,
        checker: Option<Arc<dyn ProxyChecker>>,
    ) -> Result<Self, RouterError> {
        config.validate().map_err(RouterError::Config)?;

        let persist = PersistQueue::new(store.clone(), &config.persist)
            .with_write_timeout(config.store_timeout());
        persist.start();

        let load_timeout = config.rotation_timeout();
        let mut pools = HashMap::new();
        for provider in &config.providers {
            let selector: Arc<dyn CredentialSelector> = match config.selector {
                SelectorKind::Concurrent => Arc::new(ConcurrentSelector::new()),
                SelectorKind::Locked => Arc::new(LockedSelector::new()),
            };
            pools.insert(
                *provider,
                Arc::new(CredentialPool::new(
                    *provider,
                    selector,
                    store.clone(),
                    persist.clone(),
                    clock.clone(),
                    config.cooldown.clone(),
                    load_timeout,
                )),
            );
        }

        let proxies = match ProxyPool::new(
            store.clone(),
            persist.clone(),
            clock.clone(),
            &config.transport,
            load_timeout,
        ) {
            Ok(pool) => Arc::new(pool),
            Err(e) => {
                persist.shutdown(SHUTDOWN_DRAIN_TIMEOUT).await;
                return Err(e.into());
            }
        };

        let bindings = Arc::new(BindingIndex::new());
        let health = match checker {
            Some(checker) => HealthProbe::new(proxies.clone(), checker, config.health.clone()),
            None => HealthProbe::with_network_checker(proxies.clone(), config.health.clone()),
        };

        let router = Self {
            inner: Arc::new(RouterInner {
                rotation: RotationCoordinator::new(
                    store.clone(),
                    bindings.clone(),
                    clock.clone(),
                    config.rotation_timeout(),
                ),
                classifier: FailureClassifier::new(&config.classifier, &config.cooldown),
                retry: RetryPolicy::new(&config.retry),
                store,
                pools,
                proxies,
                bindings,
                persist,
                health,
                rotation_metrics: RotationMetrics::default(),
                clock,
                cancel_token: CancellationToken::new(),
                tasks: Mutex::new(Vec::new()),
                config,
            }),
        };

        if let Err(e) = router.reload().await {
            router.inner.persist.shutdown(SHUTDOWN_DRAIN_TIMEOUT).await;
            return Err(e);
        }

        if let Some(handle) = router.inner.health.start() {
            router.inner.tasks.lock().push(handle);
        }
        router.start_reload_timer();

        tracing::info!(
            "[Router] 已启动: providers={:?}, selector={:?}",
            router.inner.config.providers,
            router.inner.config.selector
        );
        Ok(router)
    }

    /// 停止后台任务并写完剩余的存储任务
    pub async fn shutdown(&self) {
        tracing::info!("[Router] 正在关闭");
        self.inner.cancel_token.cancel();
        self.inner.health.stop();

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.inner.tasks.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!("[Router] 后台任务退出异常: {}", e);
            }
        }
        self.inner.persist.shutdown(SHUTDOWN_DRAIN_TIMEOUT).await;
        tracing::info!("[Router] 已关闭");
    }

    fn start_reload_timer(&self) {
        let Some(period) = self.inner.config.reload_interval() else {
            tracing::info!("[Router] 自动重新加载已关闭");
            return;
        };

        let router = self.clone();
        let cancel_token = self.inner.cancel_token.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // 初始化时已加载过，跳过立即触发的首个 tick
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = router.reload().await {
                            tracing::error!("[Router] 定时重新加载失败: {}", e);
                        }
                    }
                    _ = cancel_token.cancelled() => {
                        break;
                    }
                }
            }
            tracing::debug!("[Router] 定时重新加载已停止");
        });
        self.inner.tasks.lock().push(handle);
    }

    /// 从存储同步重新加载凭证、代理和绑定
    pub async fn reload(&self) -> Result<(), RouterError> {
        for pool in self.inner.pools.values() {
            pool.load_all().await.map_err(RouterError::Reload)?;
        }
        self.inner
            .proxies
            .load_from_store()
            .await
            .map_err(RouterError::Reload)?;

        let bindings = tokio::time::timeout(
            self.inner.config.rotation_timeout(),
            self.inner.store.find_bindings(),
        )
        .await
        .map_err(|_| {
            RouterError::Reload(relaycast_core::StoreError::Timeout(
                "find_bindings".to_string(),
            ))
        })?
        .map_err(RouterError::Reload)?;
        let binding_count = bindings.len();
        self.inner.bindings.replace_all(bindings);

        tracing::debug!(
            "[Router] 重新加载完成: {} 个代理, {} 条绑定",
            self.inner.proxies.len(),
            binding_count
        );
        Ok(())
    }

    fn pool(&self, provider: ProviderType) -> Result<&Arc<CredentialPool>, RouterError> {
        self.inner
            .pools
            .get(&provider)
            .ok_or(RouterError::UnknownProvider(provider))
    }

    /// 为一次请求选出代理、凭证和客户端
    ///
    /// 有可用代理时优先使用该代理的绑定凭证（跳过不可用的），
    /// 没有可用绑定时退回凭证池轮询；没有可用代理时直连。
    pub async fn acquire(
        &self,
        provider: ProviderType,
        client_fingerprint: Option<&str>,
    ) -> Result<Acquisition, RouterError> {
        let pool = self.pool(provider)?;
        let fingerprint = client_fingerprint
            .map(fingerprint_digest)
            .unwrap_or_else(|| "-".to_string());

        let mut route = None;
        for _ in 0..self.inner.proxies.available_count() {
            let Some(proxy) = self.inner.proxies.select_proxy() else {
                break;
            };
            match self.inner.proxies.client_for(&proxy) {
                Ok(client) => {
                    route = Some((proxy, client));
                    break;
                }
                Err(e) => {
                    tracing::warn!("[Router] 代理 {} 无法创建客户端，跳过: {}", proxy.id, e);
                }
            }
        }

        let Some((proxy, client)) = route else {
            let credential = pool
                .select_next()
                .map_err(|e| RouterError::from_pool(provider, e))?;
            tracing::debug!(
                "[Router] {} 直连 -> {} (client={})",
                provider,
                credential.id,
                fingerprint
            );
            return Ok(Acquisition {
                client: self.inner.proxies.direct_client(),
                proxy: None,
                credential,
                binding: None,
            });
        };

        let binding = self
            .inner
            .bindings
            .resolve_with(&proxy.id, |credential_id| pool.is_available(credential_id));
        let bound = binding
            .as_ref()
            .and_then(|resolution| pool.get(&resolution.credential_id));

        let (credential, binding) = match bound {
            Some(credential) => (credential, binding),
            None => {
                let credential = pool
                    .select_next()
                    .map_err(|e| RouterError::from_pool(provider, e))?;
                (credential, None)
            }
        };

        tracing::debug!(
            "[Router] {} 代理 {} -> {} ({}) (client={})",
            provider,
            proxy.id,
            credential.id,
            if binding.is_some() { "绑定" } else { "轮询" },
            fingerprint
        );

        Ok(Acquisition {
            client,
            proxy: Some(proxy),
            credential,
            binding,
        })
    }

    /// 上报上游结果（`http_status == 0` 表示没有响应）
    ///
    /// 不返回错误，调用方可以放到后台执行。
    pub async fn report_outcome(
        &self,
        provider: ProviderType,
        credential_id: &str,
        http_status: u16,
        body: &str,
    ) {
        let Ok(pool) = self.pool(provider) else {
            tracing::warn!("[Router] 收到未启用 Provider {} 的结果上报", provider);
            return;
        };

        match self.inner.classifier.classify(provider, http_status, body) {
            FailureAction::Recover => {
                let recovering = pool
                    .get(credential_id)
                    .map(|cred| {
                        cred.status != CredentialStatus::Healthy && !cred.status.is_terminal()
                    })
                    .unwrap_or(false);
                if recovering {
                    tracing::info!("[Router] {} 凭证 {} 恢复健康", provider, credential_id);
                    pool.mark_healthy(credential_id).await;
                }
            }
            FailureAction::Cooldown(status, cooldown) => {
                let last_error = Some(describe_failure(http_status, body));
                pool.mark_status(credential_id, status, Some(cooldown), last_error)
                    .await;
            }
            FailureAction::Rotate(reason) => {
                tracing::warn!(
                    "[KeyRotation] {} 凭证 {} 需要轮换 (HTTP {}, 原因: {}): {}",
                    provider,
                    credential_id,
                    http_status,
                    reason,
                    describe_failure(http_status, body)
                );
                self.rotate_in_pool(pool, credential_id, reason).await;
            }
            FailureAction::Ignore => {
                tracing::debug!(
                    "[Router] {} 凭证 {} 的 HTTP {} 不影响凭证状态",
                    provider,
                    credential_id,
                    http_status
                );
            }
        }
    }

    /// 主动轮换（外部用量检查使用）
    pub async fn rotate(
        &self,
        provider: ProviderType,
        credential_id: &str,
        reason: RotationReason,
    ) -> Result<RotationOutcome, RouterError> {
        let pool = self.pool(provider)?;
        Ok(self.rotate_in_pool(pool, credential_id, reason).await)
    }

    async fn rotate_in_pool(
        &self,
        pool: &CredentialPool,
        credential_id: &str,
        reason: RotationReason,
    ) -> RotationOutcome {
        let outcome = match self.inner.rotation.rotate(pool, credential_id, &reason).await {
            Ok(Some(replacement)) => RotationOutcome::Rotated(replacement.id),
            Ok(None) => RotationOutcome::AlreadyRotated,
            Err(RotationError::Exhausted) => {
                pool.mark_exhausted(credential_id, Some(format!("no backup left: {reason}")))
                    .await;
                tracing::warn!(
                    "[KeyRotation] {} 凭证 {} 已停用，补充备用凭证后才能恢复",
                    pool.provider(),
                    credential_id
                );
                RotationOutcome::Exhausted
            }
            Err(RotationError::Store(e)) => {
                tracing::error!("[KeyRotation] 轮换 {} 失败: {}", credential_id, e);
                pool.mark_exhausted(credential_id, Some(format!("rotation failed: {e}")))
                    .await;
                RotationOutcome::Failed(e.to_string())
            }
        };
        self.inner.rotation_metrics.record(&outcome);
        outcome
    }

    /// 用量记录
    pub async fn record_usage(&self, provider: ProviderType, credential_id: &str, tokens: u64) {
        if let Ok(pool) = self.pool(provider) {
            pool.record_usage(credential_id, tokens).await;
        }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.inner.retry
    }

    pub fn credential_pool(&self, provider: ProviderType) -> Option<Arc<CredentialPool>> {
        self.inner.pools.get(&provider).cloned()
    }

    pub fn proxy_pool(&self) -> &Arc<ProxyPool> {
        &self.inner.proxies
    }

    pub fn bindings(&self) -> &Arc<BindingIndex> {
        &self.inner.bindings
    }

    pub fn persist_queue(&self) -> &PersistQueue {
        &self.inner.persist
    }

    /// 立即跑一轮代理健康探测
    pub async fn probe_proxies(&self) {
        self.inner.health.run_once().await;
    }

    pub async fn stats(&self) -> RouterStats {
        let mut providers = BTreeMap::new();
        for (provider, pool) in &self.inner.pools {
            let available_backups = match tokio::time::timeout(
                self.inner.config.store_timeout(),
                self.inner.store.count_available_backups(*provider),
            )
            .await
            {
                Ok(Ok(count)) => Some(count),
                Ok(Err(e)) => {
                    tracing::warn!("[Router] 查询 {} 备用凭证数量失败: {}", provider, e);
                    None
                }
                Err(_) => {
                    tracing::warn!("[Router] 查询 {} 备用凭证数量超时", provider);
                    None
                }
            };
            providers.insert(
                *provider,
                ProviderStats {
                    pool: pool.status(),
                    available_backups,
                },
            );
        }

        RouterStats {
            generated_at: self.inner.clock.now(),
            providers,
            proxies: self.inner.proxies.status(),
            available_proxies: self.inner.proxies.available_count(),
            bindings: self.inner.bindings.bindings_info(),
            queue: self.inner.persist.stats(),
            rotations: self.inner.rotation_metrics.snapshot(),
        }
    }
}

/// 写入凭证 `last_error` 的失败描述（脱敏并截断）
fn describe_failure(http_status: u16, body: &str) -> String {
    let body = truncate_for_log(&sanitize_log_message(body.trim()), ERROR_BODY_LOG_CHARS);
    if http_status == 0 {
        format!("no response: {body}")
    } else {
        format!("HTTP {http_status}: {body}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_failure_masks_and_truncates() {
        let body = format!("Bearer sk-abcdefgh12345678 {}", "x".repeat(500));
        let described = describe_failure(401, &body);
        assert!(described.starts_with("HTTP 401: "));
        assert!(!described.contains("abcdefgh12345678"));
        assert!(described.ends_with("..."));
        assert_eq!(describe_failure(0, "timeout"), "no response: timeout");
    }
}
