//! 出口代理模块
//!
//! - `client_factory` - 按代理构建 HTTP 客户端
//! - `pool` - 代理池与客户端缓存
//! - `health` - 后台健康探测

mod client_factory;
mod health;
mod pool;

pub use client_factory::ProxyClientFactory;
pub use health::{HealthProbe, NetworkChecker, ProxyChecker};
pub use pool::{ProxyPool, ProxySummary};
