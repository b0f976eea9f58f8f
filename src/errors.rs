//! 主 crate 错误类型

use relaycast_core::{PoolError, ProviderType, StoreError};
use thiserror::Error;

/// 传输层构建错误
#[derive(Debug, Error)]
pub enum ProxyError {
    /// 无效的代理 URL
    #[error("无效的代理 URL: {0}")]
    InvalidUrl(String),

    /// 客户端构建错误
    #[error("客户端构建错误: {0}")]
    ClientBuildError(String),
}

/// 轮换错误
///
/// 只出现在日志和统计中，请求方下次选择时自然拿到新凭证。
#[derive(Debug, Error)]
pub enum RotationError {
    /// 没有可用的备用凭证
    #[error("备用凭证已耗尽")]
    Exhausted,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Router 对外错误
#[derive(Debug, Error)]
pub enum RouterError {
    /// 没有可用凭证，调用方可重试
    #[error("{0} 没有可用的凭证")]
    NoneAvailable(ProviderType),
    /// 未启用的 Provider
    #[error("未启用的 Provider: {0}")]
    UnknownProvider(ProviderType),
    #[error(transparent)]
    Transport(#[from] ProxyError),
    /// 同步重新加载失败
    #[error("重新加载失败: {0}")]
    Reload(StoreError),
    #[error("配置错误: {0}")]
    Config(String),
}

impl RouterError {
    /// 调用方是否可以稍后重试
    pub fn is_retryable(&self) -> bool {
        matches!(self, RouterError::NoneAvailable(_))
    }

    pub(crate) fn from_pool(provider: ProviderType, err: PoolError) -> Self {
        match err {
            PoolError::NoneAvailable
            | PoolError::NotFound(_)
            | PoolError::NoBinding(_)
            | PoolError::NoProxyAvailable => RouterError::NoneAvailable(provider),
        }
    }
}
