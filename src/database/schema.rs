use rusqlite::Connection;

pub fn create_tables(conn: &Connection) -> Result<(), rusqlite::Error> {
    // 上游凭证表
    conn.execute(
        "CREATE TABLE IF NOT EXISTS credentials (
            id TEXT PRIMARY KEY,
            provider TEXT NOT NULL,
            secret TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'healthy',
            cooldown_until TEXT,
            last_error TEXT,
            tokens_used INTEGER NOT NULL DEFAULT 0,
            requests_count INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_credentials_provider ON credentials(provider, created_at)",
        [],
    )?;

    // 备用凭证表
    conn.execute(
        "CREATE TABLE IF NOT EXISTS backup_credentials (
            id TEXT PRIMARY KEY,
            provider TEXT NOT NULL,
            secret TEXT NOT NULL,
            used INTEGER NOT NULL DEFAULT 0,
            used_at TEXT,
            used_for TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_backup_credentials_available
         ON backup_credentials(provider, used, created_at)",
        [],
    )?;

    // 出口代理表
    conn.execute(
        "CREATE TABLE IF NOT EXISTS proxies (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            kind TEXT NOT NULL,
            host TEXT NOT NULL,
            port INTEGER NOT NULL,
            username TEXT,
            password TEXT,
            status TEXT NOT NULL DEFAULT 'unknown',
            fail_count INTEGER NOT NULL DEFAULT 0,
            last_latency_ms INTEGER,
            last_error TEXT,
            last_checked_at TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    // 代理绑定表
    conn.execute(
        "CREATE TABLE IF NOT EXISTS proxy_bindings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            proxy_id TEXT NOT NULL,
            credential_id TEXT NOT NULL,
            priority INTEGER NOT NULL DEFAULT 1,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_proxy_bindings_proxy ON proxy_bindings(proxy_id, priority)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_proxy_bindings_credential ON proxy_bindings(credential_id)",
        [],
    )?;

    // 代理健康日志表
    conn.execute(
        "CREATE TABLE IF NOT EXISTS proxy_health_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            proxy_id TEXT NOT NULL,
            outcome TEXT NOT NULL,
            latency_ms INTEGER,
            error_message TEXT,
            checked_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_proxy_health_logs_proxy
         ON proxy_health_logs(proxy_id, checked_at)",
        [],
    )?;

    Ok(())
}
