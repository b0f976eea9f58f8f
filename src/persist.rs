//! 异步写入队列
//!
//! 热路径上的状态写入先改内存，再把存储写入投递到这里。
//! 队列有界：满时按配置丢弃最旧任务，或等待空位直到超时后丢弃新任务。
//! 任务按记录 ID 分片到固定 worker，同一条记录的写入保持先后顺序。
//! 每次写入都有超时，写入失败或超时只记日志。

use crate::config::{BackpressurePolicy, PersistConfig};
use parking_lot::Mutex;
use relaycast_core::{
    CredentialStatusUpdate, ProviderType, ProxyHealthLog, ProxyHealthUpdate, Store, StoreResult,
};
use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// 单次存储写入的默认超时
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// 待写入任务
#[derive(Debug, Clone, PartialEq)]
pub enum PersistTask {
    CredentialStatus {
        provider: ProviderType,
        id: String,
        update: CredentialStatusUpdate,
    },
    CredentialUsage {
        provider: ProviderType,
        id: String,
        tokens: u64,
        requests: u64,
    },
    ProxyHealth {
        proxy_id: String,
        update: ProxyHealthUpdate,
    },
    HealthLog(ProxyHealthLog),
}

impl PersistTask {
    pub fn label(&self) -> &'static str {
        match self {
            PersistTask::CredentialStatus { .. } => "credential_status",
            PersistTask::CredentialUsage { .. } => "credential_usage",
            PersistTask::ProxyHealth { .. } => "proxy_health",
            PersistTask::HealthLog(_) => "health_log",
        }
    }

    /// 分片键
    fn key(&self) -> &str {
        match self {
            PersistTask::CredentialStatus { id, .. } | PersistTask::CredentialUsage { id, .. } => {
                id
            }
            PersistTask::ProxyHealth { proxy_id, .. } => proxy_id,
            PersistTask::HealthLog(log) => &log.proxy_id,
        }
    }

    async fn execute(&self, store: &dyn Store) -> StoreResult<()> {
        match self {
            PersistTask::CredentialStatus {
                provider,
                id,
                update,
            } => {
                let affected = store.update_credential_status(*provider, id, update).await?;
                if affected == 0 {
                    tracing::debug!("[PersistQueue] 凭证 {} 已不存在，状态写入被忽略", id);
                }
            }
            PersistTask::CredentialUsage {
                provider,
                id,
                tokens,
                requests,
            } => {
                store
                    .increment_credential_usage(*provider, id, *tokens, *requests)
                    .await?;
            }
            PersistTask::ProxyHealth { proxy_id, update } => {
                store.update_proxy_health(proxy_id, update).await?;
            }
            PersistTask::HealthLog(log) => {
                store.insert_health_log(log).await?;
            }
        }
        Ok(())
    }
}

/// 队列统计
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: usize,
    pub in_flight: usize,
    pub completed: u64,
    pub failed: u64,
    pub dropped: u64,
}

struct Shard {
    tasks: Mutex<VecDeque<PersistTask>>,
    item_ready: Notify,
    space_ready: Notify,
}

struct QueueShared {
    shards: Vec<Shard>,
    shard_capacity: usize,
    policy: BackpressurePolicy,
    block_timeout: Duration,
    in_flight: AtomicUsize,
    completed: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
    closed: AtomicBool,
}

/// 异步写入队列
#[derive(Clone)]
pub struct PersistQueue {
    shared: Arc<QueueShared>,
    store: Arc<dyn Store>,
    write_timeout: Duration,
    cancel_token: CancellationToken,
    workers: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl PersistQueue {
    /// 创建队列（不启动 worker）
    pub fn new(store: Arc<dyn Store>, config: &PersistConfig) -> Self {
        let workers = config.workers.max(1);
        let shard_capacity = config.capacity.div_ceil(workers).max(1);
        let shards = (0..workers)
            .map(|_| Shard {
                tasks: Mutex::new(VecDeque::with_capacity(shard_capacity)),
                item_ready: Notify::new(),
                space_ready: Notify::new(),
            })
            .collect();

        Self {
            shared: Arc::new(QueueShared {
                shards,
                shard_capacity,
                policy: config.policy,
                block_timeout: Duration::from_millis(config.block_timeout_ms),
                in_flight: AtomicUsize::new(0),
                completed: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
            store,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            cancel_token: CancellationToken::new(),
            workers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// 单次写入超时，超时计入失败；需在 `start` 之前设置
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// 启动 worker，每个分片一个
    pub fn start(&self) {
        let mut workers = self.workers.lock();
        if !workers.is_empty() {
            return;
        }
        for shard_idx in 0..self.shared.shards.len() {
            let shared = self.shared.clone();
            let store = self.store.clone();
            let cancel_token = self.cancel_token.clone();
            let write_timeout = self.write_timeout;
            workers.push(tokio::spawn(async move {
                Self::worker_loop(shard_idx, shared, store, write_timeout, cancel_token).await;
            }));
        }
        tracing::info!(
            "[PersistQueue] 已启动 {} 个写入 worker，单分片容量 {}",
            self.shared.shards.len(),
            self.shared.shard_capacity
        );
    }

    /// 投递任务，返回是否被接受
    pub async fn submit(&self, task: PersistTask) -> bool {
        if self.shared.closed.load(Ordering::Acquire) {
            tracing::debug!("[PersistQueue] 队列已关闭，丢弃 {} 写入", task.label());
            self.shared.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let shard = &self.shared.shards[self.shard_for(task.key())];
        match self.shared.policy {
            BackpressurePolicy::DropOldest => {
                {
                    let mut tasks = shard.tasks.lock();
                    if tasks.len() >= self.shared.shard_capacity {
                        if let Some(evicted) = tasks.pop_front() {
                            self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                            tracing::warn!(
                                "[PersistQueue] 队列已满，丢弃最旧的 {} 写入 (key={})",
                                evicted.label(),
                                evicted.key()
                            );
                        }
                    }
                    tasks.push_back(task);
                }
                shard.item_ready.notify_one();
                true
            }
            BackpressurePolicy::Block => {
                let deadline = tokio::time::Instant::now() + self.shared.block_timeout;
                let mut pending = Some(task);
                loop {
                    {
                        let mut tasks = shard.tasks.lock();
                        if tasks.len() < self.shared.shard_capacity {
                            if let Some(task) = pending.take() {
                                tasks.push_back(task);
                            }
                        }
                    }
                    if pending.is_none() {
                        shard.item_ready.notify_one();
                        return true;
                    }
                    if tokio::time::timeout_at(deadline, shard.space_ready.notified())
                        .await
                        .is_err()
                    {
                        self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                        if let Some(task) = pending {
                            tracing::warn!(
                                "[PersistQueue] 等待空位超时，丢弃 {} 写入 (key={})",
                                task.label(),
                                task.key()
                            );
                        }
                        return false;
                    }
                }
            }
        }
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            pending: self
                .shared
                .shards
                .iter()
                .map(|shard| shard.tasks.lock().len())
                .sum(),
            in_flight: self.shared.in_flight.load(Ordering::Acquire),
            completed: self.shared.completed.load(Ordering::Relaxed),
            failed: self.shared.failed.load(Ordering::Relaxed),
            dropped: self.shared.dropped.load(Ordering::Relaxed),
        }
    }

    /// 等待队列清空（测试和关闭时使用），返回是否在超时前清空
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let stats = self.stats();
            if stats.pending == 0 && stats.in_flight == 0 {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// 停止接收新任务，写完剩余任务后退出 worker
    pub async fn shutdown(&self, drain_timeout: Duration) {
        self.shared.closed.store(true, Ordering::Release);
        self.cancel_token.cancel();

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());
        if handles.is_empty() {
            return;
        }
        if tokio::time::timeout(drain_timeout, futures::future::join_all(handles))
            .await
            .is_err()
        {
            tracing::warn!(
                "[PersistQueue] {:?} 内未写完剩余任务，剩余 {} 条",
                drain_timeout,
                self.stats().pending
            );
        } else {
            tracing::info!("[PersistQueue] 写入队列已停止");
        }
    }

    fn shard_for(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % self.shared.shards.len()
    }

    async fn worker_loop(
        shard_idx: usize,
        shared: Arc<QueueShared>,
        store: Arc<dyn Store>,
        write_timeout: Duration,
        cancel_token: CancellationToken,
    ) {
        let shard = &shared.shards[shard_idx];
        loop {
            let next = {
                let mut tasks = shard.tasks.lock();
                let task = tasks.pop_front();
                if task.is_some() {
                    shared.in_flight.fetch_add(1, Ordering::AcqRel);
                }
                task
            };

            match next {
                Some(task) => {
                    shard.space_ready.notify_one();
                    match tokio::time::timeout(write_timeout, task.execute(store.as_ref())).await {
                        Ok(Ok(())) => {
                            shared.completed.fetch_add(1, Ordering::Relaxed);
                        }
                        Ok(Err(e)) => {
                            shared.failed.fetch_add(1, Ordering::Relaxed);
                            tracing::warn!(
                                "[PersistQueue] {} 写入失败 (key={}): {}",
                                task.label(),
                                task.key(),
                                e
                            );
                        }
                        Err(_) => {
                            shared.failed.fetch_add(1, Ordering::Relaxed);
                            tracing::warn!(
                                "[PersistQueue] {} 写入超时 ({:?}, key={})",
                                task.label(),
                                write_timeout,
                                task.key()
                            );
                        }
                    }
                    shared.in_flight.fetch_sub(1, Ordering::AcqRel);
                }
                None => {
                    if cancel_token.is_cancelled() {
                        break;
                    }
                    tokio::select! {
                        _ = shard.item_ready.notified() => {}
                        _ = cancel_token.cancelled() => {}
                    }
                }
            }
        }
    }
}
