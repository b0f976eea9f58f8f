//! 代理健康日志数据访问对象

use super::{format_time, parse_time};
use relaycast_core::{ProbeOutcome, ProxyHealthLog};
use rusqlite::{params, Connection};

pub struct HealthLogDao;

impl HealthLogDao {
    pub fn insert(conn: &Connection, log: &ProxyHealthLog) -> Result<(), rusqlite::Error> {
        conn.execute(
            "INSERT INTO proxy_health_logs (proxy_id, outcome, latency_ms, error_message, checked_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                log.proxy_id,
                log.outcome.as_str(),
                log.latency_ms.map(|v| v as i64),
                log.error_message,
                format_time(&log.checked_at),
            ],
        )?;
        Ok(())
    }

    /// 最近的日志（新的在前）
    pub fn recent(
        conn: &Connection,
        proxy_id: &str,
        limit: usize,
    ) -> Result<Vec<ProxyHealthLog>, rusqlite::Error> {
        let mut stmt = conn.prepare(
            "SELECT proxy_id, outcome, latency_ms, error_message, checked_at
             FROM proxy_health_logs WHERE proxy_id = ?1
             ORDER BY checked_at DESC, id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![proxy_id, limit as i64], |row| {
            let outcome_str: String = row.get(1)?;
            let latency_ms: Option<i64> = row.get(2)?;
            let checked_at_str: String = row.get(4)?;
            Ok(ProxyHealthLog {
                proxy_id: row.get(0)?,
                outcome: outcome_str.parse().unwrap_or(ProbeOutcome::Error),
                latency_ms: latency_ms.map(|v| v.max(0) as u64),
                error_message: row.get(3)?,
                checked_at: parse_time(&checked_at_str),
            })
        })?;
        rows.collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::schema::create_tables;
    use chrono::{Duration, Utc};

    #[test]
    fn test_recent_newest_first() {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        let base = Utc::now();
        for i in 0..3 {
            HealthLogDao::insert(
                &conn,
                &ProxyHealthLog {
                    proxy_id: "p1".to_string(),
                    outcome: if i == 2 { ProbeOutcome::Healthy } else { ProbeOutcome::Error },
                    latency_ms: Some(10 * i),
                    error_message: None,
                    checked_at: base + Duration::seconds(i as i64),
                },
            )
            .unwrap();
        }

        let logs = HealthLogDao::recent(&conn, "p1", 2).unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].outcome, ProbeOutcome::Healthy);
        assert_eq!(logs[0].latency_ms, Some(20));
    }
}
