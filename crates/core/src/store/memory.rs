//! 内存存储
//!
//! 所有操作在同一把锁内完成，天然满足删除计数和领取的原子性。
//! 用于测试和不需要持久化的嵌入场景。

use super::{CredentialStatusUpdate, ProxyHealthUpdate, Store};
use crate::binding::Binding;
use crate::credential::{BackupCredential, Credential, CredentialStatus};
use crate::errors::{StoreError, StoreResult};
use crate::proxy::{Proxy, ProxyHealthLog};
use crate::ProviderType;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Default)]
struct MemoryState {
    credentials: Vec<Credential>,
    backups: Vec<BackupCredential>,
    proxies: Vec<Proxy>,
    bindings: Vec<Binding>,
    health_logs: Vec<ProxyHealthLog>,
}

/// 内存存储
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 让后续写操作全部失败（测试错误处理路径）
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// 让批量读取失败（测试重新加载失败）
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn credentials_snapshot(&self) -> Vec<Credential> {
        self.state.lock().credentials.clone()
    }

    pub fn backups_snapshot(&self) -> Vec<BackupCredential> {
        self.state.lock().backups.clone()
    }

    pub fn proxies_snapshot(&self) -> Vec<Proxy> {
        self.state.lock().proxies.clone()
    }

    pub fn bindings_snapshot(&self) -> Vec<Binding> {
        self.state.lock().bindings.clone()
    }

    pub fn health_logs_snapshot(&self) -> Vec<ProxyHealthLog> {
        self.state.lock().health_logs.clone()
    }

    fn check_writable(&self) -> StoreResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("写入被禁用".to_string()));
        }
        Ok(())
    }

    fn check_readable(&self) -> StoreResult<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("读取被禁用".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn find_credentials(&self, provider: ProviderType) -> StoreResult<Vec<Credential>> {
        self.check_readable()?;
        Ok(self
            .state
            .lock()
            .credentials
            .iter()
            .filter(|c| c.provider == provider)
            .cloned()
            .collect())
    }

    async fn find_credential(
        &self,
        provider: ProviderType,
        id: &str,
    ) -> StoreResult<Option<Credential>> {
        Ok(self
            .state
            .lock()
            .credentials
            .iter()
            .find(|c| c.provider == provider && c.id == id)
            .cloned())
    }

    async fn insert_credential(&self, credential: &Credential) -> StoreResult<()> {
        self.check_writable()?;
        let mut state = self.state.lock();
        if state.credentials.iter().any(|c| c.id == credential.id) {
            return Err(StoreError::Conflict(format!("凭证已存在: {}", credential.id)));
        }
        state.credentials.push(credential.clone());
        Ok(())
    }

    async fn delete_credential(&self, provider: ProviderType, id: &str) -> StoreResult<u64> {
        self.check_writable()?;
        let mut state = self.state.lock();
        let before = state.credentials.len();
        state
            .credentials
            .retain(|c| !(c.provider == provider && c.id == id));
        Ok((before - state.credentials.len()) as u64)
    }

    async fn update_credential_status(
        &self,
        provider: ProviderType,
        id: &str,
        update: &CredentialStatusUpdate,
    ) -> StoreResult<u64> {
        self.check_writable()?;
        let mut state = self.state.lock();
        let mut affected = 0;
        for cred in state
            .credentials
            .iter_mut()
            .filter(|c| c.provider == provider && c.id == id)
        {
            cred.status = update.status;
            cred.cooldown_until = update.cooldown_until;
            cred.last_error = update.last_error.clone();
            affected += 1;
        }
        Ok(affected)
    }

    async fn increment_credential_usage(
        &self,
        provider: ProviderType,
        id: &str,
        tokens: u64,
        requests: u64,
    ) -> StoreResult<u64> {
        self.check_writable()?;
        let mut state = self.state.lock();
        let mut affected = 0;
        for cred in state
            .credentials
            .iter_mut()
            .filter(|c| c.provider == provider && c.id == id)
        {
            cred.usage.tokens_used = cred.usage.tokens_used.saturating_add(tokens);
            cred.usage.requests_count = cred.usage.requests_count.saturating_add(requests);
            affected += 1;
        }
        Ok(affected)
    }

    async fn count_credentials(
        &self,
        provider: ProviderType,
        status: Option<CredentialStatus>,
    ) -> StoreResult<u64> {
        Ok(self
            .state
            .lock()
            .credentials
            .iter()
            .filter(|c| c.provider == provider && status.map_or(true, |s| c.status == s))
            .count() as u64)
    }

    async fn insert_backup(&self, backup: &BackupCredential) -> StoreResult<()> {
        self.check_writable()?;
        let mut state = self.state.lock();
        if state.backups.iter().any(|b| b.id == backup.id) {
            return Err(StoreError::Conflict(format!("备用凭证已存在: {}", backup.id)));
        }
        state.backups.push(backup.clone());
        Ok(())
    }

    async fn find_available_backup(
        &self,
        provider: ProviderType,
    ) -> StoreResult<Option<BackupCredential>> {
        Ok(self
            .state
            .lock()
            .backups
            .iter()
            .find(|b| b.provider == provider && !b.used)
            .cloned())
    }

    async fn claim_backup(
        &self,
        provider: ProviderType,
        used_for: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<BackupCredential>> {
        self.check_writable()?;
        let mut state = self.state.lock();
        match state
            .backups
            .iter_mut()
            .find(|b| b.provider == provider && !b.used)
        {
            Some(backup) => {
                backup.claim(used_for, now);
                Ok(Some(backup.clone()))
            }
            None => Ok(None),
        }
    }

    async fn count_available_backups(&self, provider: ProviderType) -> StoreResult<u64> {
        Ok(self
            .state
            .lock()
            .backups
            .iter()
            .filter(|b| b.provider == provider && !b.used)
            .count() as u64)
    }

    async fn find_proxies(&self) -> StoreResult<Vec<Proxy>> {
        self.check_readable()?;
        Ok(self.state.lock().proxies.clone())
    }

    async fn insert_proxy(&self, proxy: &Proxy) -> StoreResult<()> {
        self.check_writable()?;
        let mut state = self.state.lock();
        if state.proxies.iter().any(|p| p.id == proxy.id) {
            return Err(StoreError::Conflict(format!("代理已存在: {}", proxy.id)));
        }
        state.proxies.push(proxy.clone());
        Ok(())
    }

    async fn update_proxy_health(&self, id: &str, update: &ProxyHealthUpdate) -> StoreResult<u64> {
        self.check_writable()?;
        let mut state = self.state.lock();
        let mut affected = 0;
        for proxy in state.proxies.iter_mut().filter(|p| p.id == id) {
            proxy.status = update.status;
            proxy.fail_count = update.fail_count;
            proxy.last_latency_ms = update.last_latency_ms;
            proxy.last_error = update.last_error.clone();
            proxy.last_checked_at = update.last_checked_at;
            affected += 1;
        }
        Ok(affected)
    }

    async fn insert_health_log(&self, log: &ProxyHealthLog) -> StoreResult<()> {
        self.check_writable()?;
        self.state.lock().health_logs.push(log.clone());
        Ok(())
    }

    async fn find_health_logs(
        &self,
        proxy_id: &str,
        limit: usize,
    ) -> StoreResult<Vec<ProxyHealthLog>> {
        Ok(self
            .state
            .lock()
            .health_logs
            .iter()
            .rev()
            .filter(|log| log.proxy_id == proxy_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn find_bindings(&self) -> StoreResult<Vec<Binding>> {
        self.check_readable()?;
        Ok(self.state.lock().bindings.clone())
    }

    async fn insert_binding(&self, binding: &Binding) -> StoreResult<()> {
        self.check_writable()?;
        self.state.lock().bindings.push(binding.clone());
        Ok(())
    }

    async fn repoint_bindings(
        &self,
        from_credential: &str,
        to_credential: &str,
    ) -> StoreResult<u64> {
        self.check_writable()?;
        let mut state = self.state.lock();
        let mut affected = 0;
        for binding in state
            .bindings
            .iter_mut()
            .filter(|b| b.credential_id == from_credential)
        {
            binding.credential_id = to_credential.to_string();
            affected += 1;
        }
        Ok(affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_delete_reports_affected() {
        let store = MemoryStore::new();
        let cred = Credential::new("k1", "sk-secret-value-1", ProviderType::Factory);
        store.insert_credential(&cred).await.unwrap();

        assert_eq!(store.delete_credential(ProviderType::Factory, "k1").await.unwrap(), 1);
        assert_eq!(store.delete_credential(ProviderType::Factory, "k1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_insert_duplicate_conflicts() {
        let store = MemoryStore::new();
        let cred = Credential::new("k1", "sk-secret-value-1", ProviderType::Factory);
        store.insert_credential(&cred).await.unwrap();
        assert!(matches!(
            store.insert_credential(&cred).await,
            Err(StoreError::Conflict(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_claim_backup_is_exclusive() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_backup(&BackupCredential::new("b1", "sk-backup-1-xxxx", ProviderType::Factory))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .claim_backup(ProviderType::Factory, &format!("k{i}"), Utc::now())
                    .await
                    .unwrap()
            }));
        }

        let mut claimed = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                claimed += 1;
            }
        }
        assert_eq!(claimed, 1);
        assert_eq!(store.count_available_backups(ProviderType::Factory).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_claimed_backup_stays_used() {
        let store = MemoryStore::new();
        store
            .insert_backup(&BackupCredential::new("b1", "sk-backup-1-xxxx", ProviderType::OpenHands))
            .await
            .unwrap();
        let claimed = store
            .claim_backup(ProviderType::OpenHands, "k1", Utc::now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.used_for.as_deref(), Some("k1"));

        assert!(store
            .claim_backup(ProviderType::OpenHands, "k2", Utc::now())
            .await
            .unwrap()
            .is_none());
        let stored = &store.backups_snapshot()[0];
        assert!(stored.used);
        assert_eq!(stored.used_for.as_deref(), Some("k1"));
    }

    #[tokio::test]
    async fn test_fail_writes() {
        let store = MemoryStore::new();
        store.set_fail_writes(true);
        let cred = Credential::new("k1", "sk-secret-value-1", ProviderType::Factory);
        assert!(matches!(
            store.insert_credential(&cred).await,
            Err(StoreError::Backend(_))
        ));
    }

    #[tokio::test]
    async fn test_fail_reads() {
        let store = MemoryStore::new();
        store.set_fail_reads(true);
        assert!(store.find_proxies().await.is_err());
        store.set_fail_reads(false);
        assert!(store.find_proxies().await.unwrap().is_empty());
    }
}
