//! 加锁凭证选择器
//!
//! 一把 `parking_lot::Mutex` 同时保护凭证列表和轮询游标，
//! 选择、写状态、整体替换全部串行。

use super::selector::CredentialSelector;
use super::types::Credential;
use crate::errors::PoolError;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

#[derive(Debug, Default)]
struct LockedState {
    credentials: Vec<Credential>,
    cursor: usize,
}

/// 加锁凭证选择器
#[derive(Debug, Default)]
pub struct LockedSelector {
    state: Mutex<LockedState>,
}

impl LockedSelector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialSelector for LockedSelector {
    fn name(&self) -> &'static str {
        "locked"
    }

    fn replace_all(&self, credentials: Vec<Credential>) {
        let mut state = self.state.lock();
        state.credentials = credentials;
        if state.credentials.is_empty() {
            state.cursor = 0;
        } else {
            state.cursor %= state.credentials.len();
        }
    }

    fn select_next(&self, now: DateTime<Utc>) -> Result<Credential, PoolError> {
        let mut state = self.state.lock();
        let len = state.credentials.len();
        if len == 0 {
            return Err(PoolError::NoneAvailable);
        }

        let start = state.cursor % len;
        for step in 0..len {
            let idx = (start + step) % len;
            if state.credentials[idx].is_available_at(now) {
                state.cursor = (idx + 1) % len;
                return Ok(state.credentials[idx].clone());
            }
        }

        Err(PoolError::NoneAvailable)
    }

    fn get(&self, id: &str) -> Option<Credential> {
        self.state
            .lock()
            .credentials
            .iter()
            .find(|cred| cred.id == id)
            .cloned()
    }

    fn update(&self, id: &str, f: &mut dyn FnMut(&mut Credential)) -> Option<Credential> {
        let mut state = self.state.lock();
        let cred = state.credentials.iter_mut().find(|cred| cred.id == id)?;
        f(cred);
        Some(cred.clone())
    }

    fn swap(&self, old_id: &str, replacement: Credential) -> bool {
        let mut state = self.state.lock();
        state
            .credentials
            .retain(|cred| cred.id == old_id || cred.id != replacement.id);
        match state.credentials.iter().position(|cred| cred.id == old_id) {
            Some(idx) => {
                state.credentials[idx] = replacement;
                true
            }
            None => {
                state.credentials.push(replacement);
                false
            }
        }
    }

    fn snapshot(&self) -> Vec<Credential> {
        self.state.lock().credentials.clone()
    }

    fn len(&self) -> usize {
        self.state.lock().credentials.len()
    }
}
