//! 出口代理数据访问对象

use super::{format_time, parse_optional_time, parse_time};
use relaycast_core::{Proxy, ProxyAuth, ProxyHealthUpdate, ProxyKind, ProxyStatus};
use rusqlite::{params, Connection};

pub struct ProxyDao;

impl ProxyDao {
    pub fn list(conn: &Connection) -> Result<Vec<Proxy>, rusqlite::Error> {
        let mut stmt = conn.prepare(
            "SELECT id, name, kind, host, port, username, password, status, fail_count,
                    last_latency_ms, last_error, last_checked_at, active, created_at
             FROM proxies ORDER BY created_at ASC, rowid ASC",
        )?;
        let rows = stmt.query_map([], Self::row_to_proxy)?;
        rows.collect()
    }

    pub fn insert(conn: &Connection, proxy: &Proxy) -> Result<(), rusqlite::Error> {
        let (username, password) = match &proxy.auth {
            Some(auth) => (Some(auth.username.as_str()), Some(auth.password.as_str())),
            None => (None, None),
        };
        conn.execute(
            "INSERT INTO proxies (id, name, kind, host, port, username, password, status,
                fail_count, last_latency_ms, last_error, last_checked_at, active, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                proxy.id,
                proxy.name,
                proxy.kind.as_str(),
                proxy.host,
                proxy.port,
                username,
                password,
                proxy.status.as_str(),
                proxy.fail_count,
                proxy.last_latency_ms.map(|v| v as i64),
                proxy.last_error,
                proxy.last_checked_at.as_ref().map(format_time),
                proxy.active,
                format_time(&proxy.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn update_health(
        conn: &Connection,
        id: &str,
        update: &ProxyHealthUpdate,
    ) -> Result<usize, rusqlite::Error> {
        conn.execute(
            "UPDATE proxies
             SET status = ?1, fail_count = ?2, last_latency_ms = ?3, last_error = ?4,
                 last_checked_at = ?5
             WHERE id = ?6",
            params![
                update.status.as_str(),
                update.fail_count,
                update.last_latency_ms.map(|v| v as i64),
                update.last_error,
                update.last_checked_at.as_ref().map(format_time),
                id,
            ],
        )
    }

    fn row_to_proxy(row: &rusqlite::Row) -> Result<Proxy, rusqlite::Error> {
        let id: String = row.get(0)?;
        let name: String = row.get(1)?;
        let kind_str: String = row.get(2)?;
        let host: String = row.get(3)?;
        let port: u16 = row.get(4)?;
        let username: Option<String> = row.get(5)?;
        let password: Option<String> = row.get(6)?;
        let status_str: String = row.get(7)?;
        let fail_count: u32 = row.get(8)?;
        let last_latency_ms: Option<i64> = row.get(9)?;
        let last_error: Option<String> = row.get(10)?;
        let last_checked_at: Option<String> = row.get(11)?;
        let active: bool = row.get(12)?;
        let created_at_str: String = row.get(13)?;

        let kind: ProxyKind = kind_str.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, e.into())
        })?;
        let status: ProxyStatus = status_str.parse().unwrap_or(ProxyStatus::Unknown);
        let auth = match (username, password) {
            (Some(username), password) if !username.is_empty() => Some(ProxyAuth {
                username,
                password: password.unwrap_or_default(),
            }),
            _ => None,
        };

        Ok(Proxy {
            id,
            name,
            kind,
            host,
            port,
            auth,
            status,
            fail_count,
            last_latency_ms: last_latency_ms.map(|v| v.max(0) as u64),
            last_error,
            last_checked_at: parse_optional_time(last_checked_at),
            active,
            created_at: parse_time(&created_at_str),
        })
    }
}
