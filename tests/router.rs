use std::sync::Arc;

use chrono::Utc;
use relaycast::credential::RotationReason;
use relaycast::{
    BackupCredential, Binding, Credential, CredentialStatus, ManualClock, MemoryStore,
    ProviderType, Proxy, ProxyKind, RelayConfig, RotationOutcome, Router, RouterError, Store,
};

fn test_config() -> RelayConfig {
    let mut config = RelayConfig::default();
    config.providers = vec![ProviderType::Factory, ProviderType::OpenHands];
    config.reload_interval_secs = 0;
    config.health.enabled = false;
    config
}

fn key(id: &str, provider: ProviderType) -> Credential {
    Credential::new(id, format!("fk-secret-{id}-0123456789"), provider)
}

async fn seeded_store(keys: &[&str], backups: &[&str]) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    let base = Utc::now();
    for (i, id) in keys.iter().enumerate() {
        store
            .insert_credential(
                &key(id, ProviderType::Factory)
                    .with_created_at(base + chrono::Duration::milliseconds(i as i64)),
            )
            .await
            .unwrap();
    }
    for id in backups {
        store
            .insert_backup(&BackupCredential::new(
                *id,
                format!("fk-backup-{id}-0123456789"),
                ProviderType::Factory,
            ))
            .await
            .unwrap();
    }
    store
}

async fn start(store: Arc<MemoryStore>) -> (Router, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let router = Router::init_with(store, test_config(), clock.clone(), None)
        .await
        .unwrap();
    (router, clock)
}

#[tokio::test]
async fn test_direct_round_robin_without_proxies() {
    let store = seeded_store(&["k1", "k2", "k3"], &[]).await;
    let (router, _clock) = start(store).await;

    let mut ids = Vec::new();
    for _ in 0..4 {
        let acquisition = router.acquire(ProviderType::Factory, None).await.unwrap();
        assert!(acquisition.proxy.is_none());
        assert!(acquisition.binding.is_none());
        ids.push(acquisition.credential.id);
    }
    assert_eq!(ids, vec!["k1", "k2", "k3", "k1"]);
    router.shutdown().await;
}

#[tokio::test]
async fn test_unknown_provider_and_empty_pool() {
    let store = seeded_store(&["k1"], &[]).await;
    let (router, _clock) = start(store).await;

    assert!(matches!(
        router.acquire(ProviderType::OhMyGpt, None).await,
        Err(RouterError::UnknownProvider(ProviderType::OhMyGpt))
    ));
    let err = router
        .acquire(ProviderType::OpenHands, Some("client-a"))
        .await
        .unwrap_err();
    assert!(matches!(err, RouterError::NoneAvailable(ProviderType::OpenHands)));
    assert!(err.is_retryable());
    router.shutdown().await;
}

#[tokio::test]
async fn test_binding_priority_and_cooldown_fallback() {
    let store = seeded_store(&["k1", "k2", "k3"], &[]).await;
    store
        .insert_proxy(&Proxy::new("p1", ProxyKind::Http, "127.0.0.1", 3128))
        .await
        .unwrap();
    store.insert_binding(&Binding::new("p1", "k2", 1)).await.unwrap();
    store.insert_binding(&Binding::new("p1", "k3", 2)).await.unwrap();
    let (router, clock) = start(store).await;

    let first = router
        .acquire(ProviderType::Factory, Some("client-a"))
        .await
        .unwrap();
    assert_eq!(first.proxy.as_ref().unwrap().id, "p1");
    assert_eq!(first.credential.id, "k2");
    assert_eq!(first.binding.as_ref().unwrap().priority, 1);

    router
        .report_outcome(ProviderType::Factory, "k2", 429, "rate limited")
        .await;
    let second = router.acquire(ProviderType::Factory, None).await.unwrap();
    assert_eq!(second.credential.id, "k3");
    assert_eq!(second.binding.as_ref().unwrap().priority, 2);

    // 冷却结束后回到优先级 1
    clock.advance(chrono::Duration::seconds(61));
    let third = router.acquire(ProviderType::Factory, None).await.unwrap();
    assert_eq!(third.credential.id, "k2");
    router.shutdown().await;
}

#[tokio::test]
async fn test_unbound_proxy_falls_back_to_pool() {
    let store = seeded_store(&["k1", "k2"], &[]).await;
    store
        .insert_proxy(&Proxy::new("p1", ProxyKind::Socks5, "127.0.0.1", 1080))
        .await
        .unwrap();
    // 绑定指向另一个 Provider 的凭证，不能使用
    store
        .insert_credential(&key("oh1", ProviderType::OpenHands))
        .await
        .unwrap();
    store.insert_binding(&Binding::new("p1", "oh1", 1)).await.unwrap();
    let (router, _clock) = start(store).await;

    let acquisition = router.acquire(ProviderType::Factory, None).await.unwrap();
    assert_eq!(acquisition.proxy.unwrap().id, "p1");
    assert!(acquisition.binding.is_none());
    assert_eq!(acquisition.credential.id, "k1");

    let bound = router.acquire(ProviderType::OpenHands, None).await.unwrap();
    assert_eq!(bound.credential.id, "oh1");
    assert!(bound.binding.is_some());
    router.shutdown().await;
}

#[tokio::test]
async fn test_auth_failure_rotates_to_backup() {
    let store = seeded_store(&["k1", "k2"], &["b1"]).await;
    store
        .insert_proxy(&Proxy::new("p1", ProxyKind::Http, "127.0.0.1", 3128))
        .await
        .unwrap();
    store.insert_binding(&Binding::new("p1", "k1", 1)).await.unwrap();
    let (router, _clock) = start(store.clone()).await;

    router
        .report_outcome(
            ProviderType::Factory,
            "k1",
            401,
            r#"{"error":{"type":"authentication_error"}}"#,
        )
        .await;

    let acquisition = router.acquire(ProviderType::Factory, None).await.unwrap();
    assert_eq!(acquisition.credential.id, "b1");
    assert_eq!(acquisition.binding.unwrap().credential_id, "b1");

    let stats = router.stats().await;
    assert_eq!(stats.rotations.rotated, 1);
    let factory = &stats.providers[&ProviderType::Factory];
    assert_eq!(factory.available_backups, Some(0));
    assert_eq!(factory.pool.total, 2);
    assert!(factory
        .pool
        .credentials
        .iter()
        .all(|c| !c.masked_secret.contains("0123456789")));
    assert_eq!(stats.bindings["p1"], vec!["b1".to_string()]);

    assert!(store.credentials_snapshot().iter().all(|c| c.id != "k1"));
    router.shutdown().await;
}

#[tokio::test]
async fn test_rotation_without_backup_exhausts() {
    let store = seeded_store(&["k1"], &[]).await;
    let (router, _clock) = start(store.clone()).await;

    router
        .report_outcome(ProviderType::Factory, "k1", 402, "payment required")
        .await;

    assert!(matches!(
        router.acquire(ProviderType::Factory, None).await,
        Err(RouterError::NoneAvailable(ProviderType::Factory))
    ));
    router.shutdown().await;

    // 关闭时写完队列，存储中也是耗尽
    let stored = store.credentials_snapshot();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].status, CredentialStatus::Exhausted);
}

#[tokio::test]
async fn test_concurrent_reports_rotate_once() {
    let store = seeded_store(&["k1", "k2"], &["b1"]).await;
    let (router, _clock) = start(store.clone()).await;

    let mut handles = Vec::new();
    for _ in 0..2 {
        let router = router.clone();
        handles.push(tokio::spawn(async move {
            router
                .report_outcome(ProviderType::Factory, "k1", 403, "forbidden")
                .await;
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let stats = router.stats().await;
    assert_eq!(stats.rotations.rotated, 1);
    assert_eq!(stats.rotations.already_rotated, 1);
    assert_eq!(store.credentials_snapshot().len(), 2);
    let backups = store.backups_snapshot();
    assert!(backups[0].used);
    assert_eq!(backups[0].used_for.as_deref(), Some("k1"));
    router.shutdown().await;
}

#[tokio::test]
async fn test_proactive_rotation() {
    let store = seeded_store(&["k1"], &["b1"]).await;
    let (router, _clock) = start(store).await;

    let outcome = router
        .rotate(ProviderType::Factory, "k1", RotationReason::SpendLimit)
        .await
        .unwrap();
    assert_eq!(outcome, RotationOutcome::Rotated("b1".to_string()));

    let again = router
        .rotate(ProviderType::Factory, "k1", RotationReason::SpendLimit)
        .await
        .unwrap();
    assert_eq!(again, RotationOutcome::AlreadyRotated);
    router.shutdown().await;
}

#[tokio::test]
async fn test_server_error_cools_down_then_success_recovers() {
    let store = seeded_store(&["k1", "k2"], &[]).await;
    let (router, _clock) = start(store).await;

    router
        .report_outcome(ProviderType::Factory, "k1", 502, "bad gateway")
        .await;
    let pool = router.credential_pool(ProviderType::Factory).unwrap();
    let cooled = pool.get("k1").unwrap();
    assert_eq!(cooled.status, CredentialStatus::Error);
    assert!(cooled.last_error.unwrap().starts_with("HTTP 502"));

    router
        .report_outcome(ProviderType::Factory, "k1", 200, "")
        .await;
    assert_eq!(pool.get("k1").unwrap().status, CredentialStatus::Healthy);

    // 400 普通错误不影响状态
    router
        .report_outcome(ProviderType::Factory, "k2", 400, "invalid request")
        .await;
    assert_eq!(pool.get("k2").unwrap().status, CredentialStatus::Healthy);
    router.shutdown().await;
}

#[tokio::test]
async fn test_reload_replaces_snapshot() {
    let store = seeded_store(&["k1"], &[]).await;
    let (router, _clock) = start(store.clone()).await;

    store
        .insert_credential(&key("k9", ProviderType::Factory))
        .await
        .unwrap();
    store.delete_credential(ProviderType::Factory, "k1").await.unwrap();
    router.reload().await.unwrap();

    let acquisition = router.acquire(ProviderType::Factory, None).await.unwrap();
    assert_eq!(acquisition.credential.id, "k9");
    assert_eq!(
        router
            .credential_pool(ProviderType::Factory)
            .unwrap()
            .len(),
        1
    );
    router.shutdown().await;
}

#[tokio::test]
async fn test_reload_failure_surfaces() {
    let store = seeded_store(&["k1"], &[]).await;
    let (router, _clock) = start(store.clone()).await;
    store.set_fail_reads(true);
    assert!(matches!(router.reload().await, Err(RouterError::Reload(_))));
    router.shutdown().await;
}

#[tokio::test]
async fn test_unusable_proxy_falls_back_to_direct() {
    let store = seeded_store(&["k1"], &[]).await;
    // 端口 0 无法构造客户端
    store
        .insert_proxy(&Proxy::new("p0", ProxyKind::Http, "127.0.0.1", 0))
        .await
        .unwrap();
    store.insert_binding(&Binding::new("p0", "k1", 1)).await.unwrap();
    let (router, _clock) = start(store).await;

    let acquisition = router.acquire(ProviderType::Factory, None).await.unwrap();
    assert!(acquisition.proxy.is_none());
    assert!(acquisition.binding.is_none());
    assert_eq!(acquisition.credential.id, "k1");
    router.shutdown().await;
}

#[tokio::test]
async fn test_unusable_proxy_is_skipped_for_next_proxy() {
    let store = seeded_store(&["k1", "k2"], &[]).await;
    store
        .insert_proxy(&Proxy::new("p0", ProxyKind::Socks5, "", 1080))
        .await
        .unwrap();
    store
        .insert_proxy(&Proxy::new("p1", ProxyKind::Http, "127.0.0.1", 3128))
        .await
        .unwrap();
    let (router, _clock) = start(store).await;

    for _ in 0..3 {
        let acquisition = router.acquire(ProviderType::Factory, None).await.unwrap();
        assert_eq!(acquisition.proxy.unwrap().id, "p1");
    }
    router.shutdown().await;
}
