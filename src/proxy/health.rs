//! 代理健康探测
//!
//! 固定间隔对所有代理并发探测，与流量无关。
//! 单个代理的探测：先 TCP 连接代理端口，再经代理发送一次 HEAD 请求。

use super::pool::ProxyPool;
use crate::config::HealthConfig;
use async_trait::async_trait;
use relaycast_core::Proxy;
use reqwest::Client;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// 探测实现
#[async_trait]
pub trait ProxyChecker: Send + Sync {
    /// 探测一次，成功返回延迟（毫秒）
    async fn check(&self, proxy: &Proxy, client: &Client) -> Result<u64, String>;
}

/// 真实网络探测
pub struct NetworkChecker {
    probe_url: String,
    timeout: Duration,
}

impl NetworkChecker {
    pub fn new(probe_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            probe_url: probe_url.into(),
            timeout,
        }
    }
}

#[async_trait]
impl ProxyChecker for NetworkChecker {
    async fn check(&self, proxy: &Proxy, client: &Client) -> Result<u64, String> {
        let start = Instant::now();

        match tokio::time::timeout(self.timeout, TcpStream::connect(proxy.endpoint())).await {
            Ok(Ok(_stream)) => {}
            Ok(Err(e)) => return Err(format!("TCP 连接失败: {e}")),
            Err(_) => return Err(format!("TCP 连接超时 ({:?})", self.timeout)),
        }

        // 任何 HTTP 响应都说明代理可用
        client
            .head(&self.probe_url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| format!("HEAD {} 失败: {e}", self.probe_url))?;

        Ok(start.elapsed().as_millis() as u64)
    }
}

/// 健康探测服务
pub struct HealthProbe {
    pool: Arc<ProxyPool>,
    checker: Arc<dyn ProxyChecker>,
    config: HealthConfig,
    cancel_token: CancellationToken,
}

impl HealthProbe {
    pub fn new(pool: Arc<ProxyPool>, checker: Arc<dyn ProxyChecker>, config: HealthConfig) -> Self {
        Self {
            pool,
            checker,
            config,
            cancel_token: CancellationToken::new(),
        }
    }

    /// 用网络探测创建
    pub fn with_network_checker(pool: Arc<ProxyPool>, config: HealthConfig) -> Self {
        let checker = Arc::new(NetworkChecker::new(
            config.probe_url.clone(),
            Duration::from_secs(config.timeout_secs),
        ));
        Self::new(pool, checker, config)
    }

    /// 启动探测循环（首个 tick 立即执行一次）
    pub fn start(&self) -> Option<tokio::task::JoinHandle<()>> {
        if !self.config.enabled {
            tracing::info!("[HealthProbe] 健康探测已禁用，跳过启动");
            return None;
        }

        let pool = self.pool.clone();
        let checker = self.checker.clone();
        let config = self.config.clone();
        let cancel_token = self.cancel_token.clone();

        Some(tokio::spawn(async move {
            tracing::info!(
                "[HealthProbe] 启动健康探测，间隔: {} 秒",
                config.interval_secs
            );

            let mut ticker = interval(Duration::from_secs(config.interval_secs));
            // 一轮探测超过间隔时，下一轮从本轮结束后重新计时
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        Self::check_all(&pool, checker.as_ref(), &config).await;
                    }
                    _ = cancel_token.cancelled() => {
                        tracing::info!("[HealthProbe] 收到取消信号，停止健康探测");
                        break;
                    }
                }
            }

            tracing::info!("[HealthProbe] 健康探测已停止");
        }))
    }

    pub fn stop(&self) {
        self.cancel_token.cancel();
    }

    /// 立即探测一轮（每个代理一个任务，全部完成后返回）
    pub async fn run_once(&self) {
        Self::check_all(&self.pool, self.checker.as_ref(), &self.config).await;
    }

    async fn check_all(pool: &ProxyPool, checker: &dyn ProxyChecker, config: &HealthConfig) {
        let proxies = pool.snapshot();
        if proxies.is_empty() {
            return;
        }

        let probes = proxies
            .iter()
            .map(|proxy| Self::check_proxy(pool, checker, config, proxy));
        futures::future::join_all(probes).await;

        tracing::debug!(
            "[HealthProbe] 本轮探测完成: {}/{} 可用",
            pool.available_count(),
            pool.len()
        );
    }

    async fn check_proxy(
        pool: &ProxyPool,
        checker: &dyn ProxyChecker,
        config: &HealthConfig,
        proxy: &Proxy,
    ) {
        let start = Instant::now();
        let client = match pool.client_for(proxy) {
            Ok(client) => client,
            Err(e) => {
                pool.record_probe_failure(&proxy.id, &e.to_string(), config.fail_threshold, None)
                    .await;
                return;
            }
        };

        let deadline = Duration::from_secs(config.timeout_secs);
        let result = match tokio::time::timeout(deadline, checker.check(proxy, &client)).await {
            Ok(result) => result,
            Err(_) => Err(format!("探测超时 ({deadline:?})")),
        };

        match result {
            Ok(latency_ms) => {
                pool.record_probe_success(&proxy.id, latency_ms).await;
            }
            Err(error) => {
                let elapsed = start.elapsed().as_millis() as u64;
                pool.record_probe_failure(&proxy.id, &error, config.fail_threshold, Some(elapsed))
                    .await;
            }
        }
    }
}
