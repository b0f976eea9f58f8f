//! 配置
//!
//! YAML 配置文件，所有字段都有默认值；文件不存在时使用默认配置。

use relaycast_core::ProviderType;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 选择器实现
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SelectorKind {
    /// DashMap + ArcSwap 快照 + 原子游标
    #[default]
    Concurrent,
    /// 单锁列表
    Locked,
}

/// 写入队列满时的策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackpressurePolicy {
    /// 丢弃最旧的待写任务
    #[default]
    DropOldest,
    /// 等待空位，超时后丢弃新任务
    Block,
}

/// 冷却配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CooldownConfig {
    /// 429 后的冷却时间（秒）
    pub rate_limited_secs: u64,
    /// 其它错误后的冷却时间（秒）
    pub error_secs: u64,
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            rate_limited_secs: 60,
            error_secs: 30,
        }
    }
}

/// 代理健康探测配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    pub timeout_secs: u64,
    /// 连续失败多少次标记为不健康
    pub fail_threshold: u32,
    /// 经代理发送 HEAD 请求的目标
    pub probe_url: String,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 30,
            timeout_secs: 10,
            fail_threshold: 3,
            probe_url: "https://www.cloudflare.com".to_string(),
        }
    }
}

/// 异步写入队列配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistConfig {
    pub capacity: usize,
    pub workers: usize,
    pub policy: BackpressurePolicy,
    /// `block` 策略下等待空位的最长时间（毫秒）
    pub block_timeout_ms: u64,
}

impl Default for PersistConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            workers: 2,
            policy: BackpressurePolicy::DropOldest,
            block_timeout_ms: 200,
        }
    }
}

/// 上游传输层配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub connect_timeout_secs: u64,
    pub keepalive_secs: u64,
    pub idle_timeout_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 30,
            keepalive_secs: 5,
            idle_timeout_secs: 120,
        }
    }
}

/// 调用方重试配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// 首次请求之外最多再试几次
    pub max_extra_attempts: u32,
    /// 首次重试前的等待（毫秒），之后每次翻倍
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_extra_attempts: 2,
            base_delay_ms: 1000,
        }
    }
}

/// 失败分类配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ClassifierConfig {
    /// 额外的"额度耗尽"响应体标记（小写匹配）
    pub extra_quota_markers: Vec<String>,
}

/// 日志配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace / debug / info / warn / error
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// 顶层配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// SQLite 文件路径；为空时使用 `~/.relaycast/relaycast.db`
    pub database_path: Option<PathBuf>,
    pub providers: Vec<ProviderType>,
    pub selector: SelectorKind,
    /// 自动重新加载间隔（秒），0 表示关闭
    pub reload_interval_secs: u64,
    /// 普通存储操作超时（秒）
    pub store_timeout_secs: u64,
    /// 重新加载与轮换的存储超时（秒）
    pub rotation_timeout_secs: u64,
    pub cooldown: CooldownConfig,
    pub health: HealthConfig,
    pub persist: PersistConfig,
    pub transport: TransportConfig,
    pub retry: RetryConfig,
    pub classifier: ClassifierConfig,
    pub logging: LoggingConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            providers: vec![ProviderType::Factory, ProviderType::OpenHands],
            selector: SelectorKind::Concurrent,
            reload_interval_secs: 60,
            store_timeout_secs: 5,
            rotation_timeout_secs: 10,
            cooldown: CooldownConfig::default(),
            health: HealthConfig::default(),
            persist: PersistConfig::default(),
            transport: TransportConfig::default(),
            retry: RetryConfig::default(),
            classifier: ClassifierConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl RelayConfig {
    /// 校验配置
    pub fn validate(&self) -> Result<(), String> {
        if self.providers.is_empty() {
            return Err("providers 不能为空".to_string());
        }
        if self.store_timeout_secs == 0 || self.rotation_timeout_secs == 0 {
            return Err("存储超时必须大于 0".to_string());
        }
        if self.health.enabled && (self.health.interval_secs == 0 || self.health.timeout_secs == 0)
        {
            return Err("健康探测间隔和超时必须大于 0".to_string());
        }
        if self.health.fail_threshold == 0 {
            return Err("fail_threshold 必须大于 0".to_string());
        }
        if self.persist.capacity == 0 || self.persist.workers == 0 {
            return Err("写入队列容量和 worker 数必须大于 0".to_string());
        }
        Ok(())
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }

    pub fn rotation_timeout(&self) -> Duration {
        Duration::from_secs(self.rotation_timeout_secs)
    }

    pub fn reload_interval(&self) -> Option<Duration> {
        (self.reload_interval_secs > 0).then(|| Duration::from_secs(self.reload_interval_secs))
    }

    /// 数据库文件路径
    pub fn resolve_database_path(&self) -> Result<PathBuf, String> {
        if let Some(path) = &self.database_path {
            return Ok(path.clone());
        }
        let home = dirs::home_dir().ok_or_else(|| "无法获取主目录".to_string())?;
        Ok(home.join(".relaycast").join("relaycast.db"))
    }
}

/// 解析 YAML 配置
pub fn parse_config(yaml: &str) -> Result<RelayConfig, String> {
    let config: RelayConfig =
        serde_yaml::from_str(yaml).map_err(|e| format!("解析配置失败: {e}"))?;
    config.validate()?;
    Ok(config)
}

/// 从文件加载配置，文件不存在时返回默认配置
pub fn load_config(path: &Path) -> Result<RelayConfig, String> {
    if !path.exists() {
        tracing::info!("[Config] 配置文件 {:?} 不存在，使用默认配置", path);
        return Ok(RelayConfig::default());
    }
    let content =
        std::fs::read_to_string(path).map_err(|e| format!("读取配置文件 {path:?} 失败: {e}"))?;
    parse_config(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = RelayConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.health.fail_threshold, 3);
        assert_eq!(config.cooldown.rate_limited_secs, 60);
        assert_eq!(config.retry.max_extra_attempts, 2);
    }

    #[test]
    fn test_parse_partial_yaml() {
        let yaml = r#"
providers: [factory, ohmygpt]
selector: locked
health:
  interval_secs: 15
persist:
  policy: block
  block_timeout_ms: 50
"#;
        let config = parse_config(yaml).unwrap();
        assert_eq!(
            config.providers,
            vec![ProviderType::Factory, ProviderType::OhMyGpt]
        );
        assert_eq!(config.selector, SelectorKind::Locked);
        assert_eq!(config.health.interval_secs, 15);
        assert_eq!(config.health.timeout_secs, 10);
        assert_eq!(config.persist.policy, BackpressurePolicy::Block);
        assert_eq!(config.persist.capacity, 1024);
    }

    #[test]
    fn test_rejects_zero_capacity() {
        let yaml = "persist:\n  capacity: 0\n";
        assert!(parse_config(yaml).is_err());
    }

    #[test]
    fn test_reload_interval_disabled() {
        let config = RelayConfig {
            reload_interval_secs: 0,
            ..RelayConfig::default()
        };
        assert!(config.reload_interval().is_none());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("missing.yaml")).unwrap();
        assert_eq!(config, RelayConfig::default());
    }
}
