//! SQLite record store.
//!
//! Each namespace maps to one table `pictor_<namespace>` in the database
//! file, so several namespaces can share a file. Writes are autocommitted;
//! other processes see them as soon as the statement completes.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{missing_database, CompactStats, Record, RecordStore};
use crate::config::DatabaseConfig;
use crate::error::{Error, Result};
use crate::feature::FeatureVector;
use crate::id::RecordId;

/// Relational record store backed by an SQLite file.
pub struct SqliteStore {
    namespace: String,
    path: PathBuf,
    table: String,
    conn: Mutex<Connection>,
}

pub(crate) fn factory(config: &DatabaseConfig, namespace: &str) -> Result<Box<dyn RecordStore>> {
    let path = config.require_path()?;
    Ok(Box::new(SqliteStore::open(path, namespace)?))
}

impl SqliteStore {
    /// Opens (or creates) the database file. The parent directory must exist.
    pub fn open<P: AsRef<Path>>(path: P, namespace: &str) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !parent.is_dir() {
                return Err(Error::Configuration(format!(
                    "sqlite database {} is unreachable: {} does not exist",
                    path.display(),
                    parent.display()
                )));
            }
        }

        let conn = Connection::open(path).map_err(|e| {
            Error::Configuration(format!("cannot open sqlite database {}: {}", path.display(), e))
        })?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        Ok(Self {
            namespace: namespace.to_string(),
            path: path.to_path_buf(),
            table: format!("pictor_{}", namespace),
            conn: Mutex::new(conn),
        })
    }

    /// Returns the path of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn table_exists(&self, conn: &Connection) -> Result<bool> {
        let count: i64 = conn.query_row(
            "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![self.table],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn require_table(&self, conn: &Connection) -> Result<()> {
        if self.table_exists(conn)? {
            Ok(())
        } else {
            Err(missing_database(self.kind(), &self.namespace))
        }
    }

    fn file_size(conn: &Connection) -> Result<u64> {
        let pages: i64 = conn.query_row("PRAGMA page_count", [], |row| row.get(0))?;
        let size: i64 = conn.query_row("PRAGMA page_size", [], |row| row.get(0))?;
        Ok((pages * size) as u64)
    }
}

/// Decodes a `(id, seq, feature, source_ref)` row.
fn read_record(row: &Row<'_>) -> rusqlite::Result<(String, i64, Vec<u8>, Option<String>)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn into_record(raw: (String, i64, Vec<u8>, Option<String>)) -> Result<Record> {
    let (id, seq, feature, source_ref) = raw;
    let id = RecordId::parse(&id)
        .map_err(|e| Error::Storage(format!("bad id column {:?}: {}", id, e)))?;
    let feature = FeatureVector::from_bytes(&feature)
        .map_err(|e| Error::Storage(format!("bad feature column for {}: {}", id, e)))?;
    Ok(Record {
        id,
        seq: seq as u64,
        feature,
        source_ref,
    })
}

impl RecordStore for SqliteStore {
    fn kind(&self) -> &'static str {
        "sqlite3"
    }

    fn create(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id TEXT PRIMARY KEY NOT NULL,
                seq INTEGER NOT NULL,
                feature BLOB NOT NULL,
                source_ref TEXT
            );
            CREATE INDEX IF NOT EXISTS {table}_seq ON {table} (seq);",
            table = self.table
        ))?;
        Ok(())
    }

    fn drop_all(&self) -> Result<bool> {
        let conn = self.conn.lock();
        let existed = self.table_exists(&conn)?;
        conn.execute_batch(&format!("DROP TABLE IF EXISTS {}", self.table))?;
        Ok(existed)
    }

    fn is_created(&self) -> Result<bool> {
        let conn = self.conn.lock();
        self.table_exists(&conn)
    }

    fn put(&self, record: &Record) -> Result<()> {
        let conn = self.conn.lock();
        self.require_table(&conn)?;
        conn.execute(
            &format!(
                "INSERT INTO {} (id, seq, feature, source_ref) VALUES (?1, ?2, ?3, ?4)",
                self.table
            ),
            params![
                record.id.to_string(),
                record.seq as i64,
                record.feature.to_bytes(),
                record.source_ref
            ],
        )?;
        Ok(())
    }

    fn get(&self, id: &RecordId) -> Result<Option<Record>> {
        let conn = self.conn.lock();
        if !self.table_exists(&conn)? {
            return Ok(None);
        }
        let raw = conn
            .query_row(
                &format!(
                    "SELECT id, seq, feature, source_ref FROM {} WHERE id = ?1",
                    self.table
                ),
                params![id.to_string()],
                read_record,
            )
            .optional()?;
        raw.map(into_record).transpose()
    }

    fn delete(&self, id: &RecordId) -> Result<bool> {
        let conn = self.conn.lock();
        self.require_table(&conn)?;
        let changed = conn.execute(
            &format!("DELETE FROM {} WHERE id = ?1", self.table),
            params![id.to_string()],
        )?;
        Ok(changed > 0)
    }

    fn contains(&self, id: &RecordId) -> Result<bool> {
        let conn = self.conn.lock();
        if !self.table_exists(&conn)? {
            return Ok(false);
        }
        let found = conn
            .query_row(
                &format!("SELECT 1 FROM {} WHERE id = ?1", self.table),
                params![id.to_string()],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn iter_all(&self) -> Result<Vec<Record>> {
        let conn = self.conn.lock();
        self.require_table(&conn)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT id, seq, feature, source_ref FROM {} ORDER BY seq",
            self.table
        ))?;
        let rows = stmt.query_map([], read_record)?;
        let mut records = Vec::new();
        for raw in rows {
            records.push(into_record(raw?)?);
        }
        Ok(records)
    }

    fn len(&self) -> Result<usize> {
        let conn = self.conn.lock();
        if !self.table_exists(&conn)? {
            return Ok(0);
        }
        let count: i64 = conn.query_row(&format!("SELECT count(*) FROM {}", self.table), [], |row| {
            row.get(0)
        })?;
        Ok(count as usize)
    }

    fn compact(&self) -> Result<CompactStats> {
        let conn = self.conn.lock();
        self.require_table(&conn)?;
        let bytes_before = Self::file_size(&conn)?;
        conn.execute_batch("VACUUM")?;
        let bytes_after = Self::file_size(&conn)?;
        let live: i64 = conn.query_row(&format!("SELECT count(*) FROM {}", self.table), [], |row| {
            row.get(0)
        })?;

        tracing::info!(
            namespace = %self.namespace,
            path = %self.path.display(),
            bytes_before,
            bytes_after,
            "vacuumed sqlite database"
        );
        Ok(CompactStats {
            live_records: live as usize,
            bytes_before,
            bytes_after,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::{exercise_store, record};
    use std::fs;
    use std::sync::atomic::{AtomicU64, Ordering};

    static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

    fn temp_db_path() -> PathBuf {
        let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        let dir = std::env::temp_dir().join("pictor_test_sqlite");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(format!("test_{}_{}.db", std::process::id(), id));
        let _ = fs::remove_file(&path);
        path
    }

    #[test]
    fn test_sqlite_store_contract() {
        let path = temp_db_path();
        let store = SqliteStore::open(&path, "ns").unwrap();
        exercise_store(&store);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_sqlite_persistence() {
        let path = temp_db_path();
        let a = record(1, vec![0.25, 0.75]);
        {
            let store = SqliteStore::open(&path, "ns").unwrap();
            store.create().unwrap();
            store.put(&a).unwrap();
        }

        let store = SqliteStore::open(&path, "ns").unwrap();
        assert_eq!(store.get(&a.id).unwrap(), Some(a));
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_namespaces_share_a_file() {
        let path = temp_db_path();
        let one = SqliteStore::open(&path, "one").unwrap();
        let two = SqliteStore::open(&path, "two").unwrap();
        one.create().unwrap();
        two.create().unwrap();

        let r = record(1, vec![1.0]);
        one.put(&r).unwrap();
        assert!(one.contains(&r.id).unwrap());
        assert!(!two.contains(&r.id).unwrap());

        assert!(one.drop_all().unwrap());
        assert!(two.is_created().unwrap());
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_compact() {
        let path = temp_db_path();
        let store = SqliteStore::open(&path, "ns").unwrap();
        store.create().unwrap();
        let keep = record(1, vec![1.0]);
        store.put(&keep).unwrap();
        let gone = record(2, vec![2.0]);
        store.put(&gone).unwrap();
        store.delete(&gone.id).unwrap();

        let stats = store.compact().unwrap();
        assert_eq!(stats.live_records, 1);
        assert!(stats.bytes_after <= stats.bytes_before);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_unreachable_path() {
        let err = SqliteStore::open("/nonexistent/dir/store.db", "ns").err().unwrap();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
