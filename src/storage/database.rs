use rusqlite::{Connection, Result as SqlResult};
use std::path::Path;
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite connection with `user_version`-tracked schema migrations.
pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn new<P: AsRef<Path>>(path: P) -> SqlResult<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(Self { conn })
    }

    pub fn in_memory() -> SqlResult<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn schema_version(&self) -> SqlResult<usize> {
        let version: i64 = self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?;
        Ok(usize::try_from(version).unwrap_or(0))
    }

    /// Runs the migrations past the stored version, one transaction each.
    pub fn migrate(&mut self, migrations: &[&str]) -> SqlResult<()> {
        let current = self.schema_version()?;
        for (index, sql) in migrations.iter().enumerate().skip(current) {
            let version = index + 1;
            let tx = self.conn.transaction()?;
            tx.execute_batch(sql)?;
            tx.pragma_update(None, "user_version", version as i64)?;
            tx.commit()?;
            log::info!("Applied schema migration {version}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STEPS: &[&str] = &[
        "CREATE TABLE a (id INTEGER PRIMARY KEY);",
        "ALTER TABLE a ADD COLUMN name TEXT;",
    ];

    #[test]
    fn migrations_apply_once() {
        let mut db = Database::in_memory().unwrap();
        assert_eq!(db.schema_version().unwrap(), 0);

        db.migrate(&STEPS[..1]).unwrap();
        assert_eq!(db.schema_version().unwrap(), 1);

        db.migrate(STEPS).unwrap();
        db.migrate(STEPS).unwrap();
        assert_eq!(db.schema_version().unwrap(), 2);
        db.connection()
            .execute("INSERT INTO a (name) VALUES ('x')", [])
            .unwrap();
    }

    #[test]
    fn version_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat.db");
        Database::new(&path).unwrap().migrate(STEPS).unwrap();
        assert_eq!(Database::new(&path).unwrap().schema_version().unwrap(), 2);
    }
}
