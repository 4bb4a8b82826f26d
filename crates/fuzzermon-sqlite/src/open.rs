use crate::schema::MIGRATIONS;
use anyhow::{bail, Result};
use rusqlite::Connection;
use tracing::{debug, info};

pub struct Db {
    pub conn: Connection,
}

impl Db {
    pub fn open_or_create(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "opening results database");
        let conn = Connection::open(path)?;
        apply_file_pragmas(&conn)?;
        apply_pragmas(&conn)?;
        migrate(&conn)?;
        Ok(Db { conn })
    }

    /// Private database that disappears with the connection. Used by tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        apply_pragmas(&conn)?;
        migrate(&conn)?;
        Ok(Db { conn })
    }

    pub fn set_busy_timeout(&self, timeout: std::time::Duration) -> Result<()> {
        self.conn.busy_timeout(timeout)?;
        Ok(())
    }

    pub fn schema_version(&self) -> Result<i64> {
        Ok(self.conn.query_row("PRAGMA user_version", [], |r| r.get(0))?)
    }
}

fn apply_file_pragmas(conn: &Connection) -> Result<()> {
    let mode: String = conn.pragma_update_and_check(None, "journal_mode", "WAL", |r| r.get(0))?;
    debug!(journal_mode = %mode, "journal mode set");
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    Ok(())
}

fn apply_pragmas(conn: &Connection) -> Result<()> {
    // cascades depend on this; it is off by default and per connection
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "cache_size", -65536i64)?; // 64 MiB
    Ok(())
}

fn migrate(conn: &Connection) -> Result<()> {
    let current: i64 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    let target = MIGRATIONS.len() as i64;
    if current < 0 {
        bail!("database schema version {current} is not a valid migration level");
    }
    if current > target {
        bail!("database schema version {current} is newer than this build supports ({target})");
    }
    for (idx, script) in MIGRATIONS.iter().enumerate().skip(current as usize) {
        info!(version = idx + 1, "applying schema migration");
        conn.execute_batch(script)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_database_is_fully_migrated() {
        let db = Db::open_in_memory().unwrap();
        assert_eq!(db.schema_version().unwrap(), MIGRATIONS.len() as i64);
    }

    #[test]
    fn foreign_keys_are_enforced() {
        let db = Db::open_in_memory().unwrap();
        let on: i64 = db.conn.query_row("PRAGMA foreign_keys", [], |r| r.get(0)).unwrap();
        assert_eq!(on, 1);
    }

    #[test]
    fn reopening_does_not_reapply_migrations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.sqlite3");
        {
            let db = Db::open_or_create(&path).unwrap();
            db.create_arch("ARM").unwrap();
        }
        let db = Db::open_or_create(&path).unwrap();
        assert!(db.find_arch("ARM").unwrap().is_some());
        assert_eq!(db.schema_version().unwrap(), 1);
    }

    #[test]
    fn refuses_newer_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("future.sqlite3");
        {
            let conn = Connection::open(&path).unwrap();
            conn.pragma_update(None, "user_version", 99i64).unwrap();
        }
        assert!(Db::open_or_create(&path).is_err());
    }

    #[test]
    fn refuses_negative_schema_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corrupt.sqlite3");
        {
            let conn = Connection::open(&path).unwrap();
            conn.pragma_update(None, "user_version", -1i64).unwrap();
        }
        let err = Db::open_or_create(&path).err().unwrap();
        assert!(err.to_string().contains("-1"), "{err}");
    }
}
