//! 代理绑定数据访问对象

use super::{format_time, parse_time};
use relaycast_core::Binding;
use rusqlite::{params, Connection};

pub struct BindingDao;

impl BindingDao {
    pub fn list(conn: &Connection) -> Result<Vec<Binding>, rusqlite::Error> {
        let mut stmt = conn.prepare(
            "SELECT proxy_id, credential_id, priority, active, created_at
             FROM proxy_bindings ORDER BY proxy_id ASC, priority ASC, created_at ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            let created_at_str: String = row.get(4)?;
            Ok(Binding {
                proxy_id: row.get(0)?,
                credential_id: row.get(1)?,
                priority: row.get(2)?,
                active: row.get(3)?,
                created_at: parse_time(&created_at_str),
            })
        })?;
        rows.collect()
    }

    pub fn insert(conn: &Connection, binding: &Binding) -> Result<(), rusqlite::Error> {
        conn.execute(
            "INSERT INTO proxy_bindings (proxy_id, credential_id, priority, active, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                binding.proxy_id,
                binding.credential_id,
                binding.priority,
                binding.active,
                format_time(&binding.created_at),
            ],
        )?;
        Ok(())
    }

    /// 批量改指向，返回修改条数
    pub fn repoint(conn: &Connection, from: &str, to: &str) -> Result<usize, rusqlite::Error> {
        conn.execute(
            "UPDATE proxy_bindings SET credential_id = ?1 WHERE credential_id = ?2",
            params![to, from],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::schema::create_tables;

    #[test]
    fn test_repoint_bindings() {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        BindingDao::insert(&conn, &Binding::new("p1", "old", 1)).unwrap();
        BindingDao::insert(&conn, &Binding::new("p2", "old", 2)).unwrap();
        BindingDao::insert(&conn, &Binding::new("p2", "keep", 1).inactive()).unwrap();

        assert_eq!(BindingDao::repoint(&conn, "old", "new").unwrap(), 2);
        let bindings = BindingDao::list(&conn).unwrap();
        assert_eq!(bindings.iter().filter(|b| b.credential_id == "new").count(), 2);
        assert!(bindings.iter().any(|b| b.credential_id == "keep" && !b.active));
    }
}
