//! RelayCast Core Crate
//!
//! 包含纯数据类型和无 I/O 的内存结构。
//!
//! ## 模块结构
//! - `models`: Provider 类型
//! - `clock`: 时钟抽象（测试可注入手动时钟）
//! - `errors`: 错误类型定义
//! - `credential`: 凭证类型与两种选择器实现
//! - `proxy`: 出口代理类型与健康状态迁移
//! - `binding`: 代理到凭证的绑定索引
//! - `slots`: 基于 ArcSwap 的无锁快照列表
//! - `store`: 持久化存储 Trait 与内存实现

pub mod binding;
pub mod clock;
pub mod credential;
pub mod errors;
pub mod models;
pub mod proxy;
pub mod slots;
pub mod store;

// 重新导出常用类型
pub use binding::{Binding, BindingIndex, BindingResolution};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use credential::{
    BackupCredential, ConcurrentSelector, Credential, CredentialSelector, CredentialStatus,
    CredentialUsage, LockedSelector,
};
pub use errors::{PoolError, StoreError, StoreResult};
pub use models::provider_type::ProviderType;
pub use proxy::{ProbeOutcome, Proxy, ProxyAuth, ProxyHealthLog, ProxyKind, ProxyStatus};
pub use store::{CredentialStatusUpdate, MemoryStore, ProxyHealthUpdate, Store};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
