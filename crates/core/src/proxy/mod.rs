//! 出口代理类型
//!
//! 健康状态迁移规则写在类型上，探测器和代理池只负责调用：
//! 失败累计到阈值才标记不健康，一次成功立即恢复并清零计数。

use crate::slots::Keyed;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 代理协议
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyKind {
    Http,
    Socks5,
}

impl ProxyKind {
    /// 构造代理 URL 使用的 scheme（SOCKS5 走代理端 DNS 解析）
    pub fn scheme(&self) -> &'static str {
        match self {
            ProxyKind::Http => "http",
            ProxyKind::Socks5 => "socks5h",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyKind::Http => "http",
            ProxyKind::Socks5 => "socks5",
        }
    }
}

impl std::fmt::Display for ProxyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProxyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "http" | "https" => Ok(ProxyKind::Http),
            "socks5" | "socks5h" | "socks" => Ok(ProxyKind::Socks5),
            _ => Err(format!("Invalid proxy kind: {s}")),
        }
    }
}

/// 代理健康状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyStatus {
    Healthy,
    Unhealthy,
    Unknown,
}

impl ProxyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyStatus::Healthy => "healthy",
            ProxyStatus::Unhealthy => "unhealthy",
            ProxyStatus::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ProxyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProxyStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "healthy" => Ok(ProxyStatus::Healthy),
            "unhealthy" => Ok(ProxyStatus::Unhealthy),
            "unknown" | "" => Ok(ProxyStatus::Unknown),
            _ => Err(format!("Invalid proxy status: {s}")),
        }
    }
}

/// 代理认证信息
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProxyAuth {
    pub username: String,
    pub password: String,
}

/// 出口代理
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Proxy {
    pub id: String,
    pub name: String,
    pub kind: ProxyKind,
    pub host: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<ProxyAuth>,
    pub status: ProxyStatus,
    /// 连续探测失败次数
    pub fail_count: u32,
    pub last_latency_ms: Option<u64>,
    pub last_error: Option<String>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl Proxy {
    pub fn new(id: impl Into<String>, kind: ProxyKind, host: impl Into<String>, port: u16) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            kind,
            host: host.into(),
            port,
            auth: None,
            status: ProxyStatus::Unknown,
            fail_count: 0,
            last_latency_ms: None,
            last_error: None,
            last_checked_at: None,
            active: true,
            created_at: Utc::now(),
        }
    }

    pub fn with_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.auth = Some(ProxyAuth {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    /// 是否可参与选择
    pub fn is_available(&self) -> bool {
        self.active && self.status != ProxyStatus::Unhealthy
    }

    /// `host:port`
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// 连接配置指纹，任一项变化都需要重建传输层
    pub fn config_fingerprint(&self) -> String {
        let (user, pass) = match &self.auth {
            Some(auth) => (auth.username.as_str(), auth.password.as_str()),
            None => ("", ""),
        };
        format!(
            "{}|{}|{}|{}|{}",
            self.kind.as_str(),
            self.host,
            self.port,
            user,
            pass
        )
    }

    /// 记录一次探测成功
    pub fn record_probe_success(&mut self, latency_ms: u64, now: DateTime<Utc>) {
        self.status = ProxyStatus::Healthy;
        self.fail_count = 0;
        self.last_latency_ms = Some(latency_ms);
        self.last_error = None;
        self.last_checked_at = Some(now);
    }

    /// 记录一次探测失败，返回本次是否刚变为不健康
    pub fn record_probe_failure(&mut self, error: &str, threshold: u32, now: DateTime<Utc>) -> bool {
        self.fail_count = self.fail_count.saturating_add(1);
        self.last_error = Some(error.to_string());
        self.last_checked_at = Some(now);

        if self.fail_count >= threshold && self.status != ProxyStatus::Unhealthy {
            self.status = ProxyStatus::Unhealthy;
            return true;
        }
        false
    }

    /// 探测结果对应的日志结论
    pub fn probe_outcome(&self, success: bool) -> ProbeOutcome {
        if success {
            ProbeOutcome::Healthy
        } else if self.status == ProxyStatus::Unhealthy {
            ProbeOutcome::Unhealthy
        } else {
            ProbeOutcome::Error
        }
    }
}

impl Keyed for Proxy {
    fn key(&self) -> &str {
        &self.id
    }
}

/// 单次探测结论
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeOutcome {
    Healthy,
    /// 失败但未达阈值
    Error,
    /// 失败且已达阈值
    Unhealthy,
}

impl ProbeOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeOutcome::Healthy => "healthy",
            ProbeOutcome::Error => "error",
            ProbeOutcome::Unhealthy => "unhealthy",
        }
    }
}

impl std::str::FromStr for ProbeOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "healthy" => Ok(ProbeOutcome::Healthy),
            "error" => Ok(ProbeOutcome::Error),
            "unhealthy" => Ok(ProbeOutcome::Unhealthy),
            _ => Err(format!("Invalid probe outcome: {s}")),
        }
    }
}

/// 代理健康日志（每次探测一条）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProxyHealthLog {
    pub proxy_id: String,
    pub outcome: ProbeOutcome,
    pub latency_ms: Option<u64>,
    pub error_message: Option<String>,
    pub checked_at: DateTime<Utc>,
}
