use std::sync::Arc;
use std::time::Duration;

use relaycast::database::{import_seed, init_database, seed::parse_seed, SqliteStore};
use relaycast::{CredentialStatus, ProviderType, RelayConfig, Router, Store};

const SEED: &str = r#"
credentials:
  - { id: k1, provider: factory, secret: fk-live-0000000000001 }
  - { id: k2, provider: factory, secret: fk-live-0000000000002 }
backups:
  - { id: b1, provider: factory, secret: fk-backup-000000000001 }
proxies:
  - { id: p1, kind: http, host: 127.0.0.1, port: 3128 }
bindings:
  - { proxy_id: p1, credential_id: k1, priority: 1 }
  - { proxy_id: p1, credential_id: k2, priority: 2 }
"#;

fn test_config() -> RelayConfig {
    let mut config = RelayConfig::default();
    config.providers = vec![ProviderType::Factory];
    config.reload_interval_secs = 0;
    config.health.enabled = false;
    config
}

#[tokio::test]
async fn test_sqlite_rotation_and_status_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data").join("relaycast.db");

    {
        let store = Arc::new(SqliteStore::new(
            init_database(&path).unwrap(),
            Duration::from_secs(5),
        ));
        let report = import_seed(store.as_ref(), &parse_seed(SEED).unwrap())
            .await
            .unwrap();
        assert_eq!(report.inserted, 6);

        let router = Router::init(store.clone(), test_config()).await.unwrap();
        let first = router.acquire(ProviderType::Factory, None).await.unwrap();
        assert_eq!(first.credential.id, "k1");

        router
            .report_outcome(ProviderType::Factory, "k2", 429, "slow down")
            .await;
        router
            .report_outcome(ProviderType::Factory, "k1", 401, "invalid_api_key")
            .await;
        router.record_usage(ProviderType::Factory, "b1", 120).await;
        router.shutdown().await;
    }

    let store = SqliteStore::new(init_database(&path).unwrap(), Duration::from_secs(5));
    let credentials = store.find_credentials(ProviderType::Factory).await.unwrap();
    assert_eq!(credentials.len(), 2);
    assert!(credentials.iter().all(|c| c.id != "k1"));

    let k2 = credentials.iter().find(|c| c.id == "k2").unwrap();
    assert_eq!(k2.status, CredentialStatus::RateLimited);
    assert!(k2.cooldown_until.is_some());

    let b1 = credentials.iter().find(|c| c.id == "b1").unwrap();
    assert_eq!(b1.status, CredentialStatus::Healthy);
    assert_eq!(b1.usage.tokens_used, 120);
    assert_eq!(b1.usage.requests_count, 1);

    assert_eq!(
        store
            .count_available_backups(ProviderType::Factory)
            .await
            .unwrap(),
        0
    );
    let bindings = store.find_bindings().await.unwrap();
    assert!(bindings.iter().any(|b| b.credential_id == "b1" && b.priority == 1));
    assert!(bindings.iter().all(|b| b.credential_id != "k1"));
}

#[tokio::test]
async fn test_sqlite_exhausted_without_backup() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("relaycast.db");
    let store = Arc::new(SqliteStore::new(
        init_database(&path).unwrap(),
        Duration::from_secs(5),
    ));
    let seed = parse_seed(
        r#"
credentials:
  - { id: k1, provider: factory, secret: fk-live-0000000000001 }
"#,
    )
    .unwrap();
    import_seed(store.as_ref(), &seed).await.unwrap();

    let router = Router::init(store.clone(), test_config()).await.unwrap();
    router
        .report_outcome(ProviderType::Factory, "k1", 402, "payment required")
        .await;
    assert!(router.acquire(ProviderType::Factory, None).await.is_err());
    router.shutdown().await;

    let credentials = store.find_credentials(ProviderType::Factory).await.unwrap();
    assert_eq!(credentials.len(), 1);
    assert_eq!(credentials[0].status, CredentialStatus::Exhausted);
}
