//! SQLite 持久化
//!
//! DAO 为同步静态方法，`SqliteStore` 把它们放进 `spawn_blocking` 并加超时，
//! 对外实现 `Store` Trait。

pub mod dao;
pub mod schema;
pub mod seed;
pub mod store;

pub use seed::{import_seed, load_seed, SeedFile, SeedReport};
pub use store::SqliteStore;

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

pub type DbConnection = Arc<Mutex<Connection>>;

/// 获取数据库连接锁（自动处理 poisoned lock）
pub fn lock_db(db: &DbConnection) -> Result<std::sync::MutexGuard<'_, Connection>, String> {
    match db.lock() {
        Ok(guard) => Ok(guard),
        Err(poisoned) => {
            tracing::warn!("[数据库] 检测到数据库锁被污染，尝试恢复: {}", poisoned);
            db.clear_poison();
            Ok(poisoned.into_inner())
        }
    }
}

/// 打开（必要时创建）数据库文件并建表
pub fn init_database(path: &Path) -> Result<DbConnection, String> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)
                .map_err(|e| format!("无法创建数据库目录 {dir:?}: {e}"))?;
        }
    }
    let conn = Connection::open(path).map_err(|e| e.to_string())?;
    prepare_connection(conn)
}

/// 内存数据库（测试用）
pub fn init_memory_database() -> Result<DbConnection, String> {
    let conn = Connection::open_in_memory().map_err(|e| e.to_string())?;
    prepare_connection(conn)
}

fn prepare_connection(conn: Connection) -> Result<DbConnection, String> {
    // 设置 busy_timeout 为 5 秒，避免 "database is locked" 错误
    conn.busy_timeout(std::time::Duration::from_secs(5))
        .map_err(|e| format!("设置 busy_timeout 失败: {e}"))?;

    schema::create_tables(&conn).map_err(|e| e.to_string())?;
    tracing::info!("[数据库] 表结构已就绪");
    Ok(Arc::new(Mutex::new(conn)))
}
