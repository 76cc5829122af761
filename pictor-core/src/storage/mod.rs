//! Record stores.
//!
//! A record store persists `(id, seq, feature, source_ref)` records for one
//! namespace. Three stores ship with the crate:
//!
//! - [`SqliteStore`] (`sqlite3`) - relational embedded store, one table per namespace
//! - [`LogStore`] (`log`) - append-only, checksummed record log replayed into an ordered map
//! - [`MemoryStore`] (`memory`) - no persistence, for pure similarity work
//!
//! Stores are selected by name through a [`StoreRegistry`]; callers can
//! register their own.

pub mod log;
pub mod memory;
pub mod sqlite;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::DatabaseConfig;
use crate::error::{Error, Result};
use crate::feature::FeatureVector;
use crate::id::RecordId;

pub use log::{LogStore, SyncMode};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// A stored image record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    /// Insertion sequence number; breaks similarity ties.
    pub seq: u64,
    pub feature: FeatureVector,
    /// File path or caller-supplied label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_ref: Option<String>,
}

/// Outcome of a store compaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactStats {
    pub live_records: usize,
    pub bytes_before: u64,
    pub bytes_after: u64,
}

/// Persistence backend for one namespace.
///
/// Every call is consistent with respect to a single caller. Consistency
/// across processes is defined by each implementation.
pub trait RecordStore: Send + Sync {
    /// Registry name of the store kind.
    fn kind(&self) -> &'static str;

    /// Creates the storage schema or files. Idempotent.
    fn create(&self) -> Result<()>;

    /// Destroys the namespace's storage. Returns false if it did not exist.
    fn drop_all(&self) -> Result<bool>;

    /// Returns true if the storage schema exists.
    fn is_created(&self) -> Result<bool>;

    /// Stores a new record. Fails with `NotFound` when the database is absent.
    fn put(&self, record: &Record) -> Result<()>;

    /// Loads a record. Reports absence (also of the database) as `None`.
    fn get(&self, id: &RecordId) -> Result<Option<Record>>;

    /// Deletes a record. Returns false if it did not exist.
    fn delete(&self, id: &RecordId) -> Result<bool>;

    fn contains(&self, id: &RecordId) -> Result<bool> {
        Ok(self.get(id)?.is_some())
    }

    /// Returns every record ordered by `seq`.
    fn iter_all(&self) -> Result<Vec<Record>>;

    fn len(&self) -> Result<usize> {
        Ok(self.iter_all()?.len())
    }

    /// Forces pending writes to durable storage.
    fn flush(&self) -> Result<()> {
        Ok(())
    }

    /// Reclaims space held by deleted records.
    fn compact(&self) -> Result<CompactStats> {
        Err(Error::UnsupportedOperation(format!(
            "compact_store is not supported by the {} store",
            self.kind()
        )))
    }

    /// Releases resources. The store must not be used afterwards.
    fn close(&self) -> Result<()> {
        self.flush()
    }
}

/// Error returned by operations that need an existing database.
pub(crate) fn missing_database(kind: &str, namespace: &str) -> Error {
    Error::NotFound(format!("{} database for namespace {}", kind, namespace))
}

/// Builds a store for a namespace from its configuration section.
pub type StoreFactory = fn(&DatabaseConfig, &str) -> Result<Box<dyn RecordStore>>;

/// Maps store names to factories.
///
/// # Example
///
/// ```
/// use pictor_core::storage::StoreRegistry;
///
/// let registry = StoreRegistry::builtin();
/// assert!(registry.contains("sqlite3"));
/// assert!(registry.contains("log"));
/// assert!(registry.contains("memory"));
/// ```
#[derive(Clone)]
pub struct StoreRegistry {
    factories: BTreeMap<String, StoreFactory>,
}

impl StoreRegistry {
    /// A registry with no stores.
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// A registry with the built-in stores and their aliases.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register("sqlite3", sqlite::factory);
        registry.register("sqlite", sqlite::factory);
        registry.register("log", log::factory);
        registry.register("memory", memory::factory);
        registry.register("none", memory::factory);
        registry
    }

    /// Registers (or replaces) a store factory under `name`.
    pub fn register(&mut self, name: impl Into<String>, factory: StoreFactory) {
        self.factories.insert(name.into(), factory);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Creates the store selected by `config`, or a memory store when there
    /// is no database section.
    pub fn create(
        &self,
        config: Option<&DatabaseConfig>,
        namespace: &str,
    ) -> Result<Box<dyn RecordStore>> {
        let Some(config) = config else {
            return Ok(Box::new(MemoryStore::new(namespace)));
        };
        let factory = self.factories.get(config.driver.as_str()).ok_or_else(|| {
            Error::Configuration(format!(
                "unknown database driver {:?} (known: {})",
                config.driver,
                self.names().collect::<Vec<_>>().join(", ")
            ))
        })?;
        factory(config, namespace)
    }
}

impl Default for StoreRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn record(seq: u64, values: Vec<f32>) -> Record {
        Record {
            id: RecordId::generate(),
            seq,
            feature: FeatureVector::new("test/v1", values),
            source_ref: Some(format!("img_{}.ppm", seq)),
        }
    }

    /// Behaviour every store must share.
    pub fn exercise_store(store: &dyn RecordStore) {
        store.create().unwrap();
        assert!(store.is_created().unwrap());

        let a = record(1, vec![1.0, 0.0]);
        let b = record(2, vec![0.0, 1.0]);
        store.put(&b).unwrap();
        store.put(&a).unwrap();

        assert_eq!(store.get(&a.id).unwrap(), Some(a.clone()));
        assert!(store.contains(&b.id).unwrap());
        assert!(!store.contains(&RecordId::generate()).unwrap());

        let all = store.iter_all().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].seq, 1);
        assert_eq!(all[1].seq, 2);

        assert!(store.delete(&a.id).unwrap());
        assert!(!store.delete(&a.id).unwrap());
        assert_eq!(store.len().unwrap(), 1);

        assert!(store.drop_all().unwrap());
        assert!(!store.is_created().unwrap());
        assert!(!store.drop_all().unwrap());
        assert!(!store.contains(&b.id).unwrap());
        assert!(matches!(store.put(&a), Err(Error::NotFound(_))));
        assert!(matches!(store.iter_all(), Err(Error::NotFound(_))));

        store.create().unwrap();
        assert_eq!(store.len().unwrap(), 0);
    }
}
