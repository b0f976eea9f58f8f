//! 数据访问对象

pub mod backup;
pub mod binding;
pub mod credential;
pub mod health_log;
pub mod proxy;

pub use backup::BackupCredentialDao;
pub use binding::BindingDao;
pub use credential::CredentialDao;
pub use health_log::HealthLogDao;
pub use proxy::ProxyDao;

use chrono::{DateTime, SecondsFormat, Utc};

/// 统一的时间格式（定长，字符串顺序即时间顺序）
pub(crate) fn format_time(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_time(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

pub(crate) fn parse_optional_time(value: Option<String>) -> Option<DateTime<Utc>> {
    value.and_then(|v| {
        DateTime::parse_from_rfc3339(&v)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    })
}
