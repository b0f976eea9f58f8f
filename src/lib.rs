//! RelayCast - LLM 反向代理的凭证与出口路由
//!
//! 为每次上游请求选出 (出口代理, API Key) 组合，分类上游失败，
//! 用备用凭证透明替换失效凭证，并让内存状态与持久化存储保持一致。
//!
//! ## Workspace 结构
//!
//! - relaycast-core crate：纯数据类型、选择器、绑定索引、存储 Trait
//! - 主 crate：凭证池、轮换、代理池与健康探测、写入队列、SQLite、Router

// 重新导出 core 的常用类型
pub use relaycast_core::{
    BackupCredential, Binding, BindingIndex, BindingResolution, Credential, CredentialStatus,
    ManualClock, MemoryStore, ProviderType, Proxy, ProxyKind, ProxyStatus, Store, StoreError,
    SystemClock,
};

pub mod config;
pub mod credential;
pub mod database;
pub mod errors;
pub mod logger;
pub mod persist;
pub mod proxy;
pub mod router;

pub use config::{load_config, parse_config, RelayConfig};
pub use errors::{ProxyError, RotationError, RouterError};
pub use router::{Acquisition, RetryPolicy, RotationOutcome, Router, RouterStats};
