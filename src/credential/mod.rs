//! 凭证管理模块
//!
//! ## 模块结构
//!
//! - `pool` - 存储支撑的凭证池
//! - `classifier` - 上游失败分类
//! - `rotation` - 备用凭证轮换

mod classifier;
mod pool;
mod rotation;

pub use classifier::{FailureAction, FailureClassifier, RotationReason};
pub use pool::{CredentialPool, CredentialSummary, PoolStatus};
pub use rotation::RotationCoordinator;
