//! SQLite 存储
//!
//! 每个操作在 `spawn_blocking` 中执行 DAO，并受超时约束；
//! 超时后后台线程仍会跑完，但调用方不再等待。

use super::dao::{BackupCredentialDao, BindingDao, CredentialDao, HealthLogDao, ProxyDao};
use super::{lock_db, DbConnection};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use relaycast_core::{
    BackupCredential, Binding, Credential, CredentialStatus, CredentialStatusUpdate,
    ProviderType, Proxy, ProxyHealthLog, ProxyHealthUpdate, Store, StoreError, StoreResult,
};
use rusqlite::Connection;
use std::time::Duration;

/// SQLite 存储
#[derive(Clone)]
pub struct SqliteStore {
    db: DbConnection,
    timeout: Duration,
}

impl SqliteStore {
    pub fn new(db: DbConnection, timeout: Duration) -> Self {
        Self { db, timeout }
    }

    pub fn db(&self) -> &DbConnection {
        &self.db
    }

    async fn run<T, F>(&self, op: &'static str, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, rusqlite::Error> + Send + 'static,
    {
        let db = self.db.clone();
        let task = tokio::task::spawn_blocking(move || {
            let mut conn = lock_db(&db).map_err(StoreError::Backend)?;
            f(&mut *conn).map_err(|e| map_sqlite_error(op, e))
        });

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(StoreError::Backend(format!("{op}: {join_err}"))),
            Err(_) => {
                tracing::warn!("[SqliteStore] {} 超时 ({:?})", op, self.timeout);
                Err(StoreError::Timeout(op.to_string()))
            }
        }
    }
}

fn map_sqlite_error(op: &str, err: rusqlite::Error) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(code, _)
            if code.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            StoreError::Conflict(format!("{op}: {err}"))
        }
        _ => StoreError::Backend(format!("{op}: {err}")),
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn find_credentials(&self, provider: ProviderType) -> StoreResult<Vec<Credential>> {
        self.run("find_credentials", move |conn| {
            CredentialDao::list_by_provider(conn, provider)
        })
        .await
    }

    async fn find_credential(
        &self,
        provider: ProviderType,
        id: &str,
    ) -> StoreResult<Option<Credential>> {
        let id = id.to_string();
        self.run("find_credential", move |conn| {
            CredentialDao::get(conn, provider, &id)
        })
        .await
    }

    async fn insert_credential(&self, credential: &Credential) -> StoreResult<()> {
        let credential = credential.clone();
        self.run("insert_credential", move |conn| {
            CredentialDao::insert(conn, &credential)
        })
        .await
    }

    async fn delete_credential(&self, provider: ProviderType, id: &str) -> StoreResult<u64> {
        let id = id.to_string();
        self.run("delete_credential", move |conn| {
            CredentialDao::delete(conn, provider, &id).map(|n| n as u64)
        })
        .await
    }

    async fn update_credential_status(
        &self,
        provider: ProviderType,
        id: &str,
        update: &CredentialStatusUpdate,
    ) -> StoreResult<u64> {
        let id = id.to_string();
        let update = update.clone();
        self.run("update_credential_status", move |conn| {
            CredentialDao::update_status(conn, provider, &id, &update).map(|n| n as u64)
        })
        .await
    }

    async fn increment_credential_usage(
        &self,
        provider: ProviderType,
        id: &str,
        tokens: u64,
        requests: u64,
    ) -> StoreResult<u64> {
        let id = id.to_string();
        self.run("increment_credential_usage", move |conn| {
            CredentialDao::increment_usage(conn, provider, &id, tokens, requests).map(|n| n as u64)
        })
        .await
    }

    async fn count_credentials(
        &self,
        provider: ProviderType,
        status: Option<CredentialStatus>,
    ) -> StoreResult<u64> {
        self.run("count_credentials", move |conn| {
            CredentialDao::count(conn, provider, status)
        })
        .await
    }

    async fn insert_backup(&self, backup: &BackupCredential) -> StoreResult<()> {
        let backup = backup.clone();
        self.run("insert_backup", move |conn| {
            BackupCredentialDao::insert(conn, &backup)
        })
        .await
    }

    async fn find_available_backup(
        &self,
        provider: ProviderType,
    ) -> StoreResult<Option<BackupCredential>> {
        self.run("find_available_backup", move |conn| {
            BackupCredentialDao::first_available(conn, provider)
        })
        .await
    }

    async fn claim_backup(
        &self,
        provider: ProviderType,
        used_for: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<BackupCredential>> {
        let used_for = used_for.to_string();
        self.run("claim_backup", move |conn| {
            BackupCredentialDao::claim(conn, provider, &used_for, now)
        })
        .await
    }

    async fn count_available_backups(&self, provider: ProviderType) -> StoreResult<u64> {
        self.run("count_available_backups", move |conn| {
            BackupCredentialDao::count_available(conn, provider)
        })
        .await
    }

    async fn find_proxies(&self) -> StoreResult<Vec<Proxy>> {
        self.run("find_proxies", |conn| ProxyDao::list(conn)).await
    }

    async fn insert_proxy(&self, proxy: &Proxy) -> StoreResult<()> {
        let proxy = proxy.clone();
        self.run("insert_proxy", move |conn| ProxyDao::insert(conn, &proxy))
            .await
    }

    async fn update_proxy_health(&self, id: &str, update: &ProxyHealthUpdate) -> StoreResult<u64> {
        let id = id.to_string();
        let update = update.clone();
        self.run("update_proxy_health", move |conn| {
            ProxyDao::update_health(conn, &id, &update).map(|n| n as u64)
        })
        .await
    }

    async fn insert_health_log(&self, log: &ProxyHealthLog) -> StoreResult<()> {
        let log = log.clone();
        self.run("insert_health_log", move |conn| {
            HealthLogDao::insert(conn, &log)
        })
        .await
    }

    async fn find_health_logs(
        &self,
        proxy_id: &str,
        limit: usize,
    ) -> StoreResult<Vec<ProxyHealthLog>> {
        let proxy_id = proxy_id.to_string();
        self.run("find_health_logs", move |conn| {
            HealthLogDao::recent(conn, &proxy_id, limit)
        })
        .await
    }

    async fn find_bindings(&self) -> StoreResult<Vec<Binding>> {
        self.run("find_bindings", |conn| BindingDao::list(conn)).await
    }

    async fn insert_binding(&self, binding: &Binding) -> StoreResult<()> {
        let binding = binding.clone();
        self.run("insert_binding", move |conn| {
            BindingDao::insert(conn, &binding)
        })
        .await
    }

    async fn repoint_bindings(
        &self,
        from_credential: &str,
        to_credential: &str,
    ) -> StoreResult<u64> {
        let from = from_credential.to_string();
        let to = to_credential.to_string();
        self.run("repoint_bindings", move |conn| {
            BindingDao::repoint(conn, &from, &to).map(|n| n as u64)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::init_memory_database;
    use std::sync::Arc;

    fn create_store() -> SqliteStore {
        SqliteStore::new(init_memory_database().unwrap(), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_duplicate_insert_is_conflict() {
        let store = create_store();
        let cred = Credential::new("k1", "sk-secret-k1-0000", ProviderType::Factory);
        store.insert_credential(&cred).await.unwrap();
        assert!(matches!(
            store.insert_credential(&cred).await,
            Err(StoreError::Conflict(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_claim_single_winner() {
        let store = Arc::new(create_store());
        store
            .insert_backup(&BackupCredential::new("b1", "sk-backup-b1-0000", ProviderType::Factory))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for i in 0..6 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .claim_backup(ProviderType::Factory, &format!("k{i}"), Utc::now())
                    .await
                    .unwrap()
            }));
        }
        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_delete_then_count() {
        let store = create_store();
        for id in ["k1", "k2"] {
            store
                .insert_credential(&Credential::new(id, "sk-secret-value-00", ProviderType::OpenHands))
                .await
                .unwrap();
        }
        assert_eq!(store.delete_credential(ProviderType::OpenHands, "k1").await.unwrap(), 1);
        assert_eq!(store.delete_credential(ProviderType::OpenHands, "k1").await.unwrap(), 0);
        assert_eq!(store.count_credentials(ProviderType::OpenHands, None).await.unwrap(), 1);
    }
}
