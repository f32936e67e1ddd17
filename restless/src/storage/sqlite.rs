use super::StorageAdapter;
use crate::error::{Result, StoreError};
use crate::record::{Collections, Record};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

/// Storage backed by a single SQLite file. Each store key owns one row per
/// collection holding that collection's records as a JSON array.
pub struct SqliteAdapter {
    conn: Mutex<Connection>,
}

impl SqliteAdapter {
    /// Open or create the database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let adapter = SqliteAdapter {
            conn: Mutex::new(conn),
        };
        adapter.initialize_tables()?;
        Ok(adapter)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let adapter = SqliteAdapter {
            conn: Mutex::new(conn),
        };
        adapter.initialize_tables()?;
        Ok(adapter)
    }

    fn initialize_tables(&self) -> Result<()> {
        self.conn.lock().execute_batch(
            "
            CREATE TABLE IF NOT EXISTS stores (
                key TEXT PRIMARY KEY,
                saved_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS collections (
                store_key TEXT NOT NULL,
                name TEXT NOT NULL,
                records_json TEXT NOT NULL,
                PRIMARY KEY (store_key, name)
            );
            ",
        )?;
        Ok(())
    }
}

impl StorageAdapter for SqliteAdapter {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn save(&self, key: &str, collections: &Collections) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT OR REPLACE INTO stores (key, saved_at) VALUES (?1, datetime('now'))",
            params![key],
        )?;
        tx.execute("DELETE FROM collections WHERE store_key = ?1", params![key])?;
        {
            let mut insert =
                tx.prepare("INSERT INTO collections (store_key, name, records_json) VALUES (?1, ?2, ?3)")?;
            for (name, records) in collections {
                let records_json = serde_json::to_string(records)?;
                insert.execute(params![key, name, records_json])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<Collections>> {
        if !self.has(key)? {
            return Ok(None);
        }

        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT name, records_json FROM collections WHERE store_key = ?1")?;
        let rows = stmt.query_map(params![key], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut collections = Collections::new();
        for row in rows {
            let (name, records_json) = row?;
            let records: Vec<Record> = serde_json::from_str(&records_json).map_err(|e| {
                StoreError::Storage(format!("Collection '{name}' under '{key}' is unreadable: {e}"))
            })?;
            collections.insert(name, records);
        }
        Ok(Some(collections))
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM collections WHERE store_key = ?1", params![key])?;
        tx.execute("DELETE FROM stores WHERE key = ?1", params![key])?;
        tx.commit()?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.conn
            .lock()
            .execute_batch("DELETE FROM collections; DELETE FROM stores;")?;
        Ok(())
    }

    fn has(&self, key: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .lock()
            .query_row("SELECT 1 FROM stores WHERE key = ?1", params![key], |row| row.get(0))
            .optional()?;
        Ok(found.is_some())
    }
}
