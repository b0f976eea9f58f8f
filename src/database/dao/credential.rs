//! 凭证数据访问对象

use super::{format_time, parse_optional_time, parse_time};
use relaycast_core::{
    Credential, CredentialStatus, CredentialStatusUpdate, CredentialUsage, ProviderType,
};
use rusqlite::{params, Connection, OptionalExtension};

const CREDENTIAL_COLUMNS: &str = "id, provider, secret, status, cooldown_until, last_error,
    tokens_used, requests_count, created_at";

pub struct CredentialDao;

impl CredentialDao {
    /// 按创建顺序列出 Provider 的全部凭证
    pub fn list_by_provider(
        conn: &Connection,
        provider: ProviderType,
    ) -> Result<Vec<Credential>, rusqlite::Error> {
        let sql = format!(
            "SELECT {CREDENTIAL_COLUMNS} FROM credentials
             WHERE provider = ?1 ORDER BY created_at ASC, rowid ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![provider.as_str()], Self::row_to_credential)?;
        rows.collect()
    }

    pub fn get(
        conn: &Connection,
        provider: ProviderType,
        id: &str,
    ) -> Result<Option<Credential>, rusqlite::Error> {
        let sql = format!(
            "SELECT {CREDENTIAL_COLUMNS} FROM credentials WHERE provider = ?1 AND id = ?2"
        );
        conn.query_row(&sql, params![provider.as_str(), id], Self::row_to_credential)
            .optional()
    }

    pub fn insert(conn: &Connection, credential: &Credential) -> Result<(), rusqlite::Error> {
        let now = format_time(&credential.created_at);
        conn.execute(
            "INSERT INTO credentials (id, provider, secret, status, cooldown_until, last_error,
                tokens_used, requests_count, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                credential.id,
                credential.provider.as_str(),
                credential.secret,
                credential.status.as_str(),
                credential.cooldown_until.as_ref().map(format_time),
                credential.last_error,
                credential.usage.tokens_used as i64,
                credential.usage.requests_count as i64,
                now,
                now,
            ],
        )?;
        Ok(())
    }

    /// 返回删除条数
    pub fn delete(
        conn: &Connection,
        provider: ProviderType,
        id: &str,
    ) -> Result<usize, rusqlite::Error> {
        conn.execute(
            "DELETE FROM credentials WHERE provider = ?1 AND id = ?2",
            params![provider.as_str(), id],
        )
    }

    pub fn update_status(
        conn: &Connection,
        provider: ProviderType,
        id: &str,
        update: &CredentialStatusUpdate,
    ) -> Result<usize, rusqlite::Error> {
        conn.execute(
            "UPDATE credentials
             SET status = ?1, cooldown_until = ?2, last_error = ?3, updated_at = ?4
             WHERE provider = ?5 AND id = ?6",
            params![
                update.status.as_str(),
                update.cooldown_until.as_ref().map(format_time),
                update.last_error,
                format_time(&update.updated_at),
                provider.as_str(),
                id,
            ],
        )
    }

    pub fn increment_usage(
        conn: &Connection,
        provider: ProviderType,
        id: &str,
        tokens: u64,
        requests: u64,
    ) -> Result<usize, rusqlite::Error> {
        conn.execute(
            "UPDATE credentials
             SET tokens_used = tokens_used + ?1, requests_count = requests_count + ?2
             WHERE provider = ?3 AND id = ?4",
            params![tokens as i64, requests as i64, provider.as_str(), id],
        )
    }

    pub fn count(
        conn: &Connection,
        provider: ProviderType,
        status: Option<CredentialStatus>,
    ) -> Result<u64, rusqlite::Error> {
        let count: i64 = match status {
            Some(status) => conn.query_row(
                "SELECT COUNT(*) FROM credentials WHERE provider = ?1 AND status = ?2",
                params![provider.as_str(), status.as_str()],
                |row| row.get(0),
            )?,
            None => conn.query_row(
                "SELECT COUNT(*) FROM credentials WHERE provider = ?1",
                params![provider.as_str()],
                |row| row.get(0),
            )?,
        };
        Ok(count.max(0) as u64)
    }

    fn row_to_credential(row: &rusqlite::Row) -> Result<Credential, rusqlite::Error> {
        let id: String = row.get(0)?;
        let provider_str: String = row.get(1)?;
        let secret: String = row.get(2)?;
        let status_str: String = row.get(3)?;
        let cooldown_until: Option<String> = row.get(4)?;
        let last_error: Option<String> = row.get(5)?;
        let tokens_used: i64 = row.get(6)?;
        let requests_count: i64 = row.get(7)?;
        let created_at_str: String = row.get(8)?;

        let provider: ProviderType = provider_str.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(
                1,
                rusqlite::types::Type::Text,
                e.into(),
            )
        })?;
        // 无法识别的状态按错误处理，没有冷却时间即不可选
        let status: CredentialStatus = status_str.parse().unwrap_or(CredentialStatus::Error);

        Ok(Credential {
            id,
            secret,
            provider,
            status,
            cooldown_until: parse_optional_time(cooldown_until),
            last_error,
            created_at: parse_time(&created_at_str),
            usage: CredentialUsage {
                tokens_used: tokens_used.max(0) as u64,
                requests_count: requests_count.max(0) as u64,
            },
        })
    }
}
