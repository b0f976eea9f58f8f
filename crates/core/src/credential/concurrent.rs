//! 高并发凭证选择器
//!
//! 基于 `SlotList`：选择路径不持有任何锁，写状态只替换单个槽位。

use super::selector::CredentialSelector;
use super::types::Credential;
use crate::errors::PoolError;
use crate::slots::{Keyed, SlotList};
use chrono::{DateTime, Utc};

impl Keyed for Credential {
    fn key(&self) -> &str {
        &self.id
    }
}

/// 高并发凭证选择器
#[derive(Default)]
pub struct ConcurrentSelector {
    slots: SlotList<Credential>,
}

impl ConcurrentSelector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialSelector for ConcurrentSelector {
    fn name(&self) -> &'static str {
        "concurrent"
    }

    fn replace_all(&self, credentials: Vec<Credential>) {
        self.slots.replace_all(credentials);
    }

    fn select_next(&self, now: DateTime<Utc>) -> Result<Credential, PoolError> {
        self.slots
            .select_next(|cred| cred.is_available_at(now))
            .map(|cred| Credential::clone(&cred))
            .ok_or(PoolError::NoneAvailable)
    }

    fn get(&self, id: &str) -> Option<Credential> {
        self.slots.get(id).map(|cred| Credential::clone(&cred))
    }

    fn update(&self, id: &str, f: &mut dyn FnMut(&mut Credential)) -> Option<Credential> {
        self.slots.update(id, f).map(|cred| Credential::clone(&cred))
    }

    fn swap(&self, old_id: &str, replacement: Credential) -> bool {
        self.slots.swap(old_id, replacement)
    }

    fn snapshot(&self) -> Vec<Credential> {
        self.slots
            .snapshot()
            .into_iter()
            .map(|cred| Credential::clone(&cred))
            .collect()
    }

    fn len(&self) -> usize {
        self.slots.len()
    }
}
