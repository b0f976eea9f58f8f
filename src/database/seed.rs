//! 种子数据导入
//!
//! 从 YAML 导入凭证、备用凭证、代理和绑定。已存在的记录跳过，不覆盖。

use chrono::Utc;
use relaycast_core::{
    BackupCredential, Binding, Credential, ProviderType, Proxy, ProxyKind, Store, StoreError,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedKey {
    pub id: String,
    pub provider: ProviderType,
    pub secret: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedProxy {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub kind: ProxyKind,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedBinding {
    pub proxy_id: String,
    pub credential_id: String,
    #[serde(default = "default_priority")]
    pub priority: u32,
}

fn default_priority() -> u32 {
    1
}

/// 种子文件
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeedFile {
    pub credentials: Vec<SeedKey>,
    pub backups: Vec<SeedKey>,
    pub proxies: Vec<SeedProxy>,
    pub bindings: Vec<SeedBinding>,
}

/// 导入结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SeedReport {
    pub inserted: usize,
    pub skipped: usize,
}

impl SeedReport {
    fn record(
        &mut self,
        result: Result<(), StoreError>,
        what: &str,
        id: &str,
    ) -> Result<(), StoreError> {
        match result {
            Ok(()) => {
                self.inserted += 1;
                Ok(())
            }
            Err(StoreError::Conflict(_)) => {
                tracing::debug!("[Seed] {} {} 已存在，跳过", what, id);
                self.skipped += 1;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

pub fn parse_seed(yaml: &str) -> Result<SeedFile, String> {
    serde_yaml::from_str(yaml).map_err(|e| format!("解析种子文件失败: {e}"))
}

pub fn load_seed(path: &Path) -> Result<SeedFile, String> {
    let content =
        std::fs::read_to_string(path).map_err(|e| format!("读取种子文件 {path:?} 失败: {e}"))?;
    parse_seed(&content)
}

/// 导入种子数据
pub async fn import_seed(store: &dyn Store, seed: &SeedFile) -> Result<SeedReport, StoreError> {
    let mut report = SeedReport::default();
    let now = Utc::now();

    for key in &seed.credentials {
        let credential = Credential::new(&key.id, &key.secret, key.provider).with_created_at(now);
        report.record(store.insert_credential(&credential).await, "凭证", &key.id)?;
    }
    for key in &seed.backups {
        let backup = BackupCredential::new(&key.id, &key.secret, key.provider).with_created_at(now);
        report.record(store.insert_backup(&backup).await, "备用凭证", &key.id)?;
    }
    for entry in &seed.proxies {
        let mut proxy = Proxy::new(&entry.id, entry.kind, &entry.host, entry.port);
        if let Some(name) = &entry.name {
            proxy.name = name.clone();
        }
        if let Some(username) = &entry.username {
            proxy = proxy.with_auth(username, entry.password.clone().unwrap_or_default());
        }
        report.record(store.insert_proxy(&proxy).await, "代理", &entry.id)?;
    }
    // 绑定表没有唯一约束，按 (代理, 凭证) 去重
    let existing = store.find_bindings().await?;
    for entry in &seed.bindings {
        let id = format!("{}->{}", entry.proxy_id, entry.credential_id);
        let duplicate = existing
            .iter()
            .any(|b| b.proxy_id == entry.proxy_id && b.credential_id == entry.credential_id);
        if duplicate {
            report.record(Err(StoreError::Conflict(id.clone())), "绑定", &id)?;
            continue;
        }
        let binding = Binding::new(&entry.proxy_id, &entry.credential_id, entry.priority);
        report.record(store.insert_binding(&binding).await, "绑定", &id)?;
    }

    tracing::info!(
        "[Seed] 导入完成: 新增 {} 条，跳过 {} 条",
        report.inserted,
        report.skipped
    );
    Ok(report)
}
