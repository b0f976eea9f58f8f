//! 凭证池核心类型和选择器
//!
//! 包含凭证类型定义、选择器 Trait 及其加锁 / 无锁两种实现。
//! 持久化、冷却策略和轮换在主 crate 中。

pub mod concurrent;
pub mod pool;
pub mod selector;
pub mod types;


pub use concurrent::ConcurrentSelector;
pub use pool::LockedSelector;
pub use selector::CredentialSelector;
pub use types::{mask_secret, BackupCredential, Credential, CredentialStatus, CredentialUsage};
