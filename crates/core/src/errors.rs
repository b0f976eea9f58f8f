//! 错误类型定义

use thiserror::Error;

/// 凭证 / 代理选择错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    /// 一整轮都没有可选凭证（可重试）
    #[error("没有可用的凭证")]
    NoneAvailable,
    /// 凭证不存在
    #[error("凭证不存在: {0}")]
    NotFound(String),
    /// 代理没有可用绑定（内部使用，回退到轮询）
    #[error("代理 {0} 没有可用的绑定")]
    NoBinding(String),
    /// 没有可用代理（内部使用，回退到直连）
    #[error("没有可用的代理")]
    NoProxyAvailable,
}

impl PoolError {
    /// 调用方是否可以稍后重试
    pub fn is_retryable(&self) -> bool {
        matches!(self, PoolError::NoneAvailable)
    }
}

/// 存储错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("存储操作超时: {0}")]
    Timeout(String),
    #[error("存储后端错误: {0}")]
    Backend(String),
    #[error("存储数据冲突: {0}")]
    Conflict(String),
}

pub type StoreResult<T> = Result<T, StoreError>;
