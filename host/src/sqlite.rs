use std::{path::Path, sync::Mutex};

use bitcoin_proof_core::{
    error::{ProofError, ProofResult},
    store::{RecordStore, StoreKey},
};
use chrono::{DateTime, Local};
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult};

/// Cache entries in a single SQLite table, keyed by `{namespace}-{key}`.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    namespace: String,
}

impl SqliteStore {
    /// Opens (or creates) the database at `db_path` and initializes the table.
    pub fn new(db_path: impl AsRef<Path>, namespace: &str) -> SqliteResult<Self> {
        let conn = Connection::open_with_flags(
            db_path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE | rusqlite::OpenFlags::SQLITE_OPEN_CREATE,
        )?;
        Self::init(conn, namespace)
    }

    pub fn in_memory(namespace: &str) -> SqliteResult<Self> {
        Self::init(Connection::open_in_memory()?, namespace)
    }

    fn init(conn: Connection, namespace: &str) -> SqliteResult<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS records (
                key TEXT PRIMARY KEY,
                value BLOB NOT NULL,
                updated_at TIMESTAMP NOT NULL
            )",
            [],
        )?;
        Ok(SqliteStore {
            conn: Mutex::new(conn),
            namespace: namespace.to_string(),
        })
    }

    fn row_key(&self, key: &StoreKey) -> String {
        format!("{}-{}", self.namespace, key)
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> SqliteResult<T>) -> ProofResult<T> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| ProofError::Store("sqlite connection lock poisoned".into()))?;
        f(&conn).map_err(|e| ProofError::Store(e.to_string()))
    }

    /// Last write time of `key`, if stored.
    pub fn updated_at(&self, key: &StoreKey) -> ProofResult<Option<DateTime<Local>>> {
        let row_key = self.row_key(key);
        let stamp: Option<String> = self.with_conn(|conn| {
            conn.query_row(
                "SELECT updated_at FROM records WHERE key = ?1",
                params![row_key],
                |row| row.get(0),
            )
            .optional()
        })?;
        stamp
            .map(|s| {
                DateTime::parse_from_rfc3339(&s)
                    .map(|t| t.with_timezone(&Local))
                    .map_err(|e| ProofError::Store(format!("{key} timestamp {s}: {e}")))
            })
            .transpose()
    }

    /// Number of entries under this store's namespace.
    pub fn len(&self) -> ProofResult<usize> {
        let pattern = format!("{}-%", self.namespace);
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM records WHERE key LIKE ?1",
                params![pattern],
                |row| row.get::<_, i64>(0),
            )
        })
        .map(|n| n as usize)
    }
}

impl RecordStore for SqliteStore {
    fn read(&self, key: &StoreKey) -> ProofResult<Option<Vec<u8>>> {
        let row_key = self.row_key(key);
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT value FROM records WHERE key = ?1",
                params![row_key],
                |row| row.get(0),
            )
            .optional()
        })
    }

    fn write(&self, key: &StoreKey, value: &[u8]) -> ProofResult<()> {
        let row_key = self.row_key(key);
        let now: DateTime<Local> = Local::now();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO records (key, value, updated_at) VALUES (?1, ?2, ?3)",
                params![row_key, value, now.to_rfc3339()],
            )
        })
        .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use bitcoin_proof_core::{
        store::{load_json, save_json},
        test_utils::block_at,
        types::BlockInfo,
    };

    use super::*;

    #[test]
    fn test_read_write() -> Result<(), Box<dyn Error>> {
        let store = SqliteStore::in_memory("blockstream")?;
        let key = StoreKey::blocks(100, 110);
        assert_eq!(store.read(&key)?, None);
        assert_eq!(store.updated_at(&key)?, None);

        store.write(&key, b"one")?;
        store.write(&key, b"two")?;
        assert_eq!(store.read(&key)?, Some(b"two".to_vec()));
        assert!(store.updated_at(&key)?.is_some());
        assert_eq!(store.len()?, 1);
        Ok(())
    }

    #[test]
    fn test_json_entries() -> Result<(), Box<dyn Error>> {
        let store = SqliteStore::in_memory("mutinynet")?;
        let key = StoreKey::blocks(90, 92);
        let blocks: Vec<BlockInfo> = (90..=92).map(block_at).collect();

        save_json(&store, &key, &blocks)?;
        assert_eq!(load_json::<Vec<BlockInfo>>(&store, &key)?, Some(blocks));
        Ok(())
    }

    #[test]
    fn test_persists_across_connections() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("proofs.sqlite");
        let key = StoreKey::blocks(1, 1);

        SqliteStore::new(&path, "blockstream")?.write(&key, b"kept")?;

        let reopened = SqliteStore::new(&path, "blockstream")?;
        assert_eq!(reopened.read(&key)?, Some(b"kept".to_vec()));
        let other = SqliteStore::new(&path, "mutinynet")?;
        assert_eq!(other.read(&key)?, None);
        assert_eq!(other.len()?, 0);
        Ok(())
    }
}
