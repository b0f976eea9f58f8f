//! 备用凭证数据访问对象

use super::{format_time, parse_optional_time, parse_time};
use chrono::{DateTime, Utc};
use relaycast_core::{BackupCredential, ProviderType};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

const BACKUP_COLUMNS: &str = "id, provider, secret, used, used_at, used_for, created_at";

pub struct BackupCredentialDao;

impl BackupCredentialDao {
    pub fn insert(conn: &Connection, backup: &BackupCredential) -> Result<(), rusqlite::Error> {
        conn.execute(
            "INSERT INTO backup_credentials (id, provider, secret, used, used_at, used_for, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                backup.id,
                backup.provider.as_str(),
                backup.secret,
                backup.used,
                backup.used_at.as_ref().map(format_time),
                backup.used_for,
                format_time(&backup.created_at),
            ],
        )?;
        Ok(())
    }

    /// 最早的一条未领取备用凭证
    pub fn first_available(
        conn: &Connection,
        provider: ProviderType,
    ) -> Result<Option<BackupCredential>, rusqlite::Error> {
        let sql = format!(
            "SELECT {BACKUP_COLUMNS} FROM backup_credentials
             WHERE provider = ?1 AND used = 0
             ORDER BY created_at ASC, rowid ASC LIMIT 1"
        );
        conn.query_row(&sql, params![provider.as_str()], Self::row_to_backup)
            .optional()
    }

    /// 在一个 IMMEDIATE 事务内查找并领取
    ///
    /// IMMEDIATE 事务一开始就拿到写锁，其它连接无法在查找和更新之间插入；
    /// 更新语句仍带 `used = 0` 条件，影响行数为 0 时视为没有领到。
    pub fn claim(
        conn: &mut Connection,
        provider: ProviderType,
        used_for: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<BackupCredential>, rusqlite::Error> {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let claimed = match Self::first_available(&tx, provider)? {
            Some(mut backup) => {
                let affected = tx.execute(
                    "UPDATE backup_credentials SET used = 1, used_at = ?1, used_for = ?2
                     WHERE id = ?3 AND used = 0",
                    params![format_time(&now), used_for, backup.id],
                )?;
                if affected == 1 {
                    backup.claim(used_for, now);
                    Some(backup)
                } else {
                    None
                }
            }
            None => None,
        };
        tx.commit()?;
        Ok(claimed)
    }

    pub fn count_available(conn: &Connection, provider: ProviderType) -> Result<u64, rusqlite::Error> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM backup_credentials WHERE provider = ?1 AND used = 0",
            params![provider.as_str()],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    pub fn get(conn: &Connection, id: &str) -> Result<Option<BackupCredential>, rusqlite::Error> {
        let sql = format!("SELECT {BACKUP_COLUMNS} FROM backup_credentials WHERE id = ?1");
        conn.query_row(&sql, params![id], Self::row_to_backup).optional()
    }

    fn row_to_backup(row: &rusqlite::Row) -> Result<BackupCredential, rusqlite::Error> {
        let id: String = row.get(0)?;
        let provider_str: String = row.get(1)?;
        let secret: String = row.get(2)?;
        let used: bool = row.get(3)?;
        let used_at: Option<String> = row.get(4)?;
        let used_for: Option<String> = row.get(5)?;
        let created_at_str: String = row.get(6)?;

        let provider: ProviderType = provider_str.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, e.into())
        })?;

        Ok(BackupCredential {
            id,
            secret,
            provider,
            used,
            used_at: parse_optional_time(used_at),
            used_for,
            created_at: parse_time(&created_at_str),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::schema::create_tables;
    use chrono::Duration;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        conn
    }

    #[test]
    fn test_claim_oldest_first() {
        let mut conn = setup();
        let base = Utc::now();
        BackupCredentialDao::insert(
            &conn,
            &BackupCredential::new("b-new", "sk-backup-new-0001", ProviderType::Factory)
                .with_created_at(base + Duration::seconds(10)),
        )
        .unwrap();
        BackupCredentialDao::insert(
            &conn,
            &BackupCredential::new("b-old", "sk-backup-old-0001", ProviderType::Factory)
                .with_created_at(base),
        )
        .unwrap();

        let claimed = BackupCredentialDao::claim(&mut conn, ProviderType::Factory, "k1", base)
            .unwrap()
            .unwrap();
        assert_eq!(claimed.id, "b-old");
        assert!(claimed.used);
        assert_eq!(claimed.used_for.as_deref(), Some("k1"));

        let stored = BackupCredentialDao::get(&conn, "b-old").unwrap().unwrap();
        assert!(stored.used);
        assert_eq!(
            BackupCredentialDao::count_available(&conn, ProviderType::Factory).unwrap(),
            1
        );
    }

    #[test]
    fn test_claim_none_left() {
        let mut conn = setup();
        assert!(
            BackupCredentialDao::claim(&mut conn, ProviderType::OpenHands, "k1", Utc::now())
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_claim_is_final() {
        let mut conn = setup();
        BackupCredentialDao::insert(
            &conn,
            &BackupCredential::new("b1", "sk-backup-b1-0001", ProviderType::Factory),
        )
        .unwrap();

        BackupCredentialDao::claim(&mut conn, ProviderType::Factory, "k1", Utc::now()).unwrap();
        assert!(
            BackupCredentialDao::claim(&mut conn, ProviderType::Factory, "k2", Utc::now())
                .unwrap()
                .is_none()
        );
        let stored = BackupCredentialDao::get(&conn, "b1").unwrap().unwrap();
        assert!(stored.used);
        assert_eq!(stored.used_for.as_deref(), Some("k1"));
    }
}
