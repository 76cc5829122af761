//! The database handle.
//!
//! A [`Database`] ties one feature driver, one record store and one
//! similarity index together under a namespace:
//!
//! - `insert` extracts a feature, stores the record, then indexes it
//! - `search` scores the query against the index and hydrates the results
//!   from the store
//! - `pull` rebuilds the index from the store, picking up writes made by
//!   other handles or processes
//!
//! All methods take `&self`. Reads may run concurrently with each other and
//! with `pull`; callers serialise `insert`, `remove` and `pull` on a handle.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::{Config, DropPolicy};
use crate::driver::{self, DriverRegistry, FeatureDriver, InvokeCommand};
use crate::error::{Error, Result};
use crate::feature::FeatureVector;
use crate::id::{IntoRecordId, RecordId};
use crate::image::ImageSource;
use crate::index::{FlatIndex, IndexEntry};
use crate::storage::{Record, RecordStore, StoreRegistry};

/// One ranked match returned by [`Database::search`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: RecordId,
    pub similarity: f32,
    /// 1-based position in the result list.
    pub rank: usize,
    /// Path or label the record was inserted with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_ref: Option<String>,
}

struct Handle {
    namespace: String,
    drop_policy: DropPolicy,
    driver: Box<dyn FeatureDriver>,
    store: Box<dyn RecordStore>,
    index: FlatIndex,
    /// Highest sequence number handed out or seen in the store.
    last_seq: AtomicU64,
}

impl Handle {
    /// Next insertion sequence: wall-clock nanoseconds, forced monotonic, so
    /// records written by different processes still order by insertion time.
    fn next_seq(&self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        let prev = self
            .last_seq
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or_else(|last| last);
        now.max(prev + 1)
    }

    fn observe(&self, records: &[Record]) {
        if let Some(max) = records.iter().map(|r| r.seq).max() {
            self.last_seq.fetch_max(max, Ordering::SeqCst);
        }
    }

    fn load_index(&self) -> Result<usize> {
        let records = self.store.iter_all()?;
        self.observe(&records);
        let count = records.len();
        self.index.rebuild(records)?;
        Ok(count)
    }
}

/// A handle to one namespace of an image similarity store.
///
/// # Example
///
/// ```
/// use pictor_core::image::encode_ppm;
/// use pictor_core::{Config, Database, DriverConfig};
///
/// // No database section: records live in memory.
/// let db = Database::open(Config::new(DriverConfig::new("color"))).unwrap();
///
/// let red = encode_ppm(2, 2, &[[250, 0, 0]; 4]);
/// let blue = encode_ppm(2, 2, &[[0, 0, 250]; 4]);
/// let id = db.insert(red.clone()).unwrap();
/// db.insert(blue).unwrap();
///
/// let results = db.search(1, red).unwrap();
/// assert_eq!(results[0].id, id);
/// assert_eq!(results[0].rank, 1);
/// db.close().unwrap();
/// ```
pub struct Database {
    inner: RwLock<Option<Handle>>,
}

impl Database {
    /// Opens a handle with the built-in drivers and stores.
    pub fn open(config: Config) -> Result<Self> {
        Self::open_with(config, &DriverRegistry::builtin(), &StoreRegistry::builtin())
    }

    /// Opens a handle from a `.json` or `.toml` config file.
    pub fn open_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open(Config::from_file(path)?)
    }

    /// Opens a handle resolving driver and store names through the given
    /// registries.
    pub fn open_with(config: Config, drivers: &DriverRegistry, stores: &StoreRegistry) -> Result<Self> {
        config.validate()?;
        let namespace = config.namespace.clone();

        if let Some(dir) = &config.driver.data_dir {
            std::fs::create_dir_all(dir).map_err(|e| {
                Error::Configuration(format!("cannot create data_dir {}: {}", dir.display(), e))
            })?;
        }

        let driver = drivers.create(&config.driver, &namespace)?;
        let store = stores.create(config.database.as_ref(), &namespace)?;
        let auto_create = config.database.as_ref().map_or(true, |db| db.auto_create);
        if auto_create {
            store.create()?;
        }

        let handle = Handle {
            drop_policy: config
                .database
                .as_ref()
                .map(|db| db.drop_policy)
                .unwrap_or_default(),
            namespace,
            driver,
            store,
            index: FlatIndex::new(),
            last_seq: AtomicU64::new(0),
        };
        let records = if handle.store.is_created()? {
            handle.load_index()?
        } else {
            0
        };

        tracing::info!(
            namespace = %handle.namespace,
            driver = handle.driver.name(),
            store = handle.store.kind(),
            records,
            "opened database"
        );
        Ok(Self {
            inner: RwLock::new(Some(handle)),
        })
    }

    fn with<T>(&self, f: impl FnOnce(&Handle) -> Result<T>) -> Result<T> {
        let guard = self.inner.read();
        let handle = guard.as_ref().ok_or(Error::ClosedHandle)?;
        f(handle)
    }

    /// Creates the storage schema. Idempotent.
    pub fn create_database(&self) -> Result<()> {
        self.with(|h| {
            h.store.create()?;
            tracing::info!(namespace = %h.namespace, store = h.store.kind(), "created database");
            Ok(())
        })
    }

    /// Destroys the namespace's storage and clears the index.
    ///
    /// Dropping an absent database is a no-op under the lenient policy and
    /// fails with `NotFound` under the strict one.
    pub fn drop_database(&self) -> Result<()> {
        self.with(|h| {
            let existed = h.store.drop_all()?;
            h.index.clear();
            if !existed {
                if h.drop_policy == DropPolicy::Strict {
                    return Err(Error::NotFound(format!(
                        "no {} database for namespace {}",
                        h.store.kind(),
                        h.namespace
                    )));
                }
                tracing::debug!(namespace = %h.namespace, "drop of absent database ignored");
                return Ok(());
            }
            tracing::info!(namespace = %h.namespace, store = h.store.kind(), "dropped database");
            Ok(())
        })
    }

    /// Stores and indexes an image, returning its new id.
    ///
    /// File sources record their path as the `source_ref`.
    pub fn insert<S: Into<ImageSource>>(&self, source: S) -> Result<RecordId> {
        let source = source.into();
        let label = source.source_ref();
        self.insert_record(source, label)
    }

    /// Like [`insert`](Self::insert) with a caller-chosen `source_ref`.
    pub fn insert_with_label<S, L>(&self, source: S, label: L) -> Result<RecordId>
    where
        S: Into<ImageSource>,
        L: Into<String>,
    {
        self.insert_record(source.into(), Some(label.into()))
    }

    fn insert_record(&self, source: ImageSource, source_ref: Option<String>) -> Result<RecordId> {
        self.with(|h| {
            let feature = driver::feature_of(h.driver.as_ref(), &source)?;
            let record = Record {
                id: RecordId::generate(),
                seq: h.next_seq(),
                feature,
                source_ref,
            };
            h.store.put(&record)?;

            let id = record.id;
            if let Err(e) = h.index.insert(IndexEntry::from(record)) {
                h.store.delete(&id)?;
                return Err(e);
            }
            tracing::debug!(namespace = %h.namespace, %id, source = %source.describe(), "inserted record");
            Ok(id)
        })
    }

    /// Returns the `top_k` most similar records, best first.
    ///
    /// Equal scores rank the earlier insertion first. Fewer than `top_k`
    /// results come back when the index holds fewer records.
    pub fn search<S: Into<ImageSource>>(&self, top_k: usize, source: S) -> Result<Vec<SearchResult>> {
        let source = source.into();
        self.with(|h| {
            if top_k == 0 {
                return Err(Error::InvalidArgument("top_k must be at least 1".to_string()));
            }
            let query = driver::feature_of(h.driver.as_ref(), &source)?;
            let driver = h.driver.as_ref();
            let hits = h.index.search(&query, top_k, |a, b| driver.similarity(a, b));

            hits.into_iter()
                .enumerate()
                .map(|(i, hit)| {
                    let source_ref = h.store.get(&hit.id)?.and_then(|r| r.source_ref);
                    Ok(SearchResult {
                        id: hit.id,
                        similarity: hit.similarity,
                        rank: i + 1,
                        source_ref,
                    })
                })
                .collect()
        })
    }

    /// Scores two images with the active driver. Needs no storage.
    pub fn similarity<A, B>(&self, a: A, b: B) -> Result<f32>
    where
        A: Into<ImageSource>,
        B: Into<ImageSource>,
    {
        let (a, b) = (a.into(), b.into());
        self.with(|h| {
            let driver = h.driver.as_ref();
            let fa = driver::feature_of(driver, &a)?;
            let fb = driver::feature_of(driver, &b)?;
            driver::compare(driver, &fa, &fb)
        })
    }

    /// Extracts the feature vector of an image.
    pub fn feature_raw<S: Into<ImageSource>>(&self, source: S) -> Result<FeatureVector> {
        let source = source.into();
        self.with(|h| driver::feature_of(h.driver.as_ref(), &source))
    }

    /// Extracts the feature vector of an image in its text form.
    pub fn feature_string<S: Into<ImageSource>>(&self, source: S) -> Result<String> {
        Ok(self.feature_raw(source)?.to_feature_string())
    }

    /// Deletes a record and its index entry.
    pub fn remove<I: IntoRecordId>(&self, id: I) -> Result<()> {
        let id = id.into_record_id()?;
        self.with(|h| {
            let stored = h.store.delete(&id)?;
            let indexed = h.index.remove(&id);
            if !stored && !indexed {
                return Err(Error::NotFound(format!("record {}", id)));
            }
            tracing::debug!(namespace = %h.namespace, %id, "removed record");
            Ok(())
        })
    }

    /// Returns true if the store holds a record with this id.
    pub fn exists<I: IntoRecordId>(&self, id: I) -> Result<bool> {
        let id = id.into_record_id()?;
        self.with(|h| h.store.contains(&id))
    }

    /// Loads a stored record.
    pub fn get<I: IntoRecordId>(&self, id: I) -> Result<Option<Record>> {
        let id = id.into_record_id()?;
        self.with(|h| h.store.get(&id))
    }

    /// Rebuilds the index from the store. Returns the number of records.
    ///
    /// Searches running meanwhile see the old or the new index, never a mix.
    pub fn pull(&self) -> Result<usize> {
        self.with(|h| {
            if !h.store.is_created()? {
                return Err(Error::NotFound(format!(
                    "no {} database for namespace {}",
                    h.store.kind(),
                    h.namespace
                )));
            }
            let records = h.load_index()?;
            tracing::info!(namespace = %h.namespace, records, "pulled index from store");
            Ok(records)
        })
    }

    /// Compacts the index, returning the number of reclaimed slots.
    pub fn vacuum_index(&self) -> Result<usize> {
        self.with(|h| {
            let reclaimed = h.index.vacuum();
            tracing::info!(namespace = %h.namespace, reclaimed, "vacuumed index");
            Ok(reclaimed)
        })
    }

    /// Empties the index. Records stay in the store until the next `pull`.
    pub fn drop_index(&self) -> Result<()> {
        self.with(|h| {
            h.index.clear();
            tracing::info!(namespace = %h.namespace, "dropped index");
            Ok(())
        })
    }

    /// Runs a named maintenance command.
    ///
    /// | command         | handled by | result                          |
    /// |-----------------|------------|---------------------------------|
    /// | `update_idf`    | driver     | `{"documents": n}`              |
    /// | `compact_store` | store      | live records and byte sizes     |
    /// | `stats`         | handle     | namespace, index and store info |
    ///
    /// Unknown commands, and commands the active driver or store does not
    /// implement, fail with `UnsupportedOperation`.
    pub fn invoke(&self, command: &str, args: Value) -> Result<Value> {
        let command: InvokeCommand = command.parse()?;
        self.with(|h| {
            let result = match command {
                InvokeCommand::UpdateIdf => h.driver.invoke(command, &args, h.store.as_ref())?,
                InvokeCommand::CompactStore => {
                    let stats = h.store.compact()?;
                    serde_json::to_value(stats)
                        .map_err(|e| Error::Storage(format!("encode compact stats: {}", e)))?
                }
                InvokeCommand::Stats => json!({
                    "namespace": h.namespace,
                    "driver": h.driver.name(),
                    "store": h.store.kind(),
                    "created": h.store.is_created()?,
                    "records": h.store.len()?,
                    "index": h.index.stats(),
                }),
            };
            tracing::info!(namespace = %h.namespace, %command, "invoked command");
            Ok(result)
        })
    }

    /// Number of searchable records.
    pub fn len(&self) -> Result<usize> {
        self.with(|h| Ok(h.index.len()))
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn namespace(&self) -> Result<String> {
        self.with(|h| Ok(h.namespace.clone()))
    }

    pub fn is_closed(&self) -> bool {
        self.inner.read().is_none()
    }

    /// Releases the store, driver and index. Waits for in-flight calls.
    ///
    /// Every later call, including a second `close`, fails with
    /// `ClosedHandle`.
    pub fn close(&self) -> Result<()> {
        let handle = self.inner.write().take().ok_or(Error::ClosedHandle)?;
        handle.store.close()?;
        tracing::info!(namespace = %handle.namespace, "closed database");
        Ok(())
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let guard = self.inner.read();
        match guard.as_ref() {
            Some(h) => f
                .debug_struct("Database")
                .field("namespace", &h.namespace)
                .field("driver", &h.driver.name())
                .field("store", &h.store.kind())
                .field("records", &h.index.len())
                .finish(),
            None => f.debug_struct("Database").field("closed", &true).finish(),
        }
    }
}

// ============================================================================
// Async API (requires "async" feature)
// ============================================================================

#[cfg(feature = "async")]
mod async_api {
    use super::*;
    use std::sync::Arc;

    fn join_error(e: tokio::task::JoinError) -> Error {
        Error::Storage(format!("spawn_blocking failed: {}", e))
    }

    /// Async wrapper around [`Database`] for tokio applications.
    ///
    /// Every call runs on the blocking thread pool.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use pictor_core::{AsyncDatabase, Config, DriverConfig};
    ///
    /// #[tokio::main]
    /// async fn main() {
    ///     let db = AsyncDatabase::open(Config::new(DriverConfig::new("color"))).await.unwrap();
    ///     let id = db.insert("./photos/cat.ppm").await.unwrap();
    ///     let results = db.search(5, "./photos/cat.ppm").await.unwrap();
    ///     assert_eq!(results[0].id, id);
    /// }
    /// ```
    #[derive(Clone)]
    pub struct AsyncDatabase {
        inner: Arc<Database>,
    }

    impl AsyncDatabase {
        /// Opens a handle asynchronously.
        pub async fn open(config: Config) -> Result<Self> {
            let db = tokio::task::spawn_blocking(move || Database::open(config))
                .await
                .map_err(join_error)??;
            Ok(Self::from_sync(db))
        }

        /// Wraps an existing handle.
        pub fn from_sync(db: Database) -> Self {
            Self {
                inner: Arc::new(db),
            }
        }

        /// The wrapped handle.
        pub fn inner(&self) -> &Database {
            &self.inner
        }

        pub async fn insert<S: Into<ImageSource>>(&self, source: S) -> Result<RecordId> {
            let inner = Arc::clone(&self.inner);
            let source = source.into();
            tokio::task::spawn_blocking(move || inner.insert(source))
                .await
                .map_err(join_error)?
        }

        pub async fn search<S: Into<ImageSource>>(
            &self,
            top_k: usize,
            source: S,
        ) -> Result<Vec<SearchResult>> {
            let inner = Arc::clone(&self.inner);
            let source = source.into();
            tokio::task::spawn_blocking(move || inner.search(top_k, source))
                .await
                .map_err(join_error)?
        }

        pub async fn similarity<A, B>(&self, a: A, b: B) -> Result<f32>
        where
            A: Into<ImageSource>,
            B: Into<ImageSource>,
        {
            let inner = Arc::clone(&self.inner);
            let (a, b) = (a.into(), b.into());
            tokio::task::spawn_blocking(move || inner.similarity(a, b))
                .await
                .map_err(join_error)?
        }

        pub async fn remove(&self, id: RecordId) -> Result<()> {
            let inner = Arc::clone(&self.inner);
            tokio::task::spawn_blocking(move || inner.remove(id))
                .await
                .map_err(join_error)?
        }

        pub async fn exists(&self, id: RecordId) -> Result<bool> {
            let inner = Arc::clone(&self.inner);
            tokio::task::spawn_blocking(move || inner.exists(id))
                .await
                .map_err(join_error)?
        }

        pub async fn pull(&self) -> Result<usize> {
            let inner = Arc::clone(&self.inner);
            tokio::task::spawn_blocking(move || inner.pull())
                .await
                .map_err(join_error)?
        }

        pub async fn invoke(&self, command: String, args: Value) -> Result<Value> {
            let inner = Arc::clone(&self.inner);
            tokio::task::spawn_blocking(move || inner.invoke(&command, args))
                .await
                .map_err(join_error)?
        }

        pub async fn close(&self) -> Result<()> {
            let inner = Arc::clone(&self.inner);
            tokio::task::spawn_blocking(move || inner.close())
                .await
                .map_err(join_error)?
        }
    }
}

#[cfg(feature = "async")]
pub use async_api::AsyncDatabase;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DatabaseConfig, DriverConfig};
    use crate::driver::test_support::{ppm, solid};

    fn memory_db(driver: &str) -> Database {
        Database::open(Config::new(DriverConfig::new(driver))).unwrap()
    }

    #[test]
    fn test_insert_and_self_match() {
        let db = memory_db("color");
        let red = solid([220, 10, 10]);
        let id = db.insert(red.clone()).unwrap();
        db.insert(solid([10, 10, 220])).unwrap();

        let results = db.search(1, red).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, id);
        assert!((results[0].similarity - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_top_k_zero_rejected() {
        let db = memory_db("color");
        assert!(matches!(
            db.search(0, solid([0, 0, 0])),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_ranks_are_one_based() {
        let db = memory_db("idf");
        for shade in [0u8, 60, 120, 180] {
            db.insert(ppm(8, 8, |x, _| [shade, x as u8 * 20, 0])).unwrap();
        }
        let results = db.search(10, solid([60, 60, 0])).unwrap();
        let ranks: Vec<usize> = results.iter().map(|r| r.rank).collect();
        assert_eq!(ranks, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_label_is_hydrated() {
        let db = memory_db("color");
        db.insert_with_label(solid([1, 2, 3]), "sample").unwrap();
        let results = db.search(1, solid([1, 2, 3])).unwrap();
        assert_eq!(results[0].source_ref.as_deref(), Some("sample"));
    }

    #[test]
    fn test_remove_unknown_is_not_found() {
        let db = memory_db("color");
        assert!(matches!(db.remove(RecordId::generate()), Err(Error::NotFound(_))));
        assert!(matches!(db.exists("xyz"), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_failed_insert_leaves_state_intact() {
        let db = memory_db("color");
        db.insert(solid([5, 5, 5])).unwrap();
        assert!(db.insert(b"P6\n2 2\n255\n".to_vec()).is_err());
        let foreign = FeatureVector::new("idf/v1", vec![0.0; 128]);
        assert!(matches!(db.insert(foreign), Err(Error::InvalidArgument(_))));
        assert_eq!(db.len().unwrap(), 1);
    }

    #[test]
    fn test_feature_string_round_trip() {
        let db = memory_db("color");
        let image = solid([100, 150, 200]);
        let text = db.feature_string(image.clone()).unwrap();
        let feature = FeatureVector::from_feature_string(&text).unwrap();
        assert_eq!(feature, db.feature_raw(image).unwrap());
    }

    #[test]
    fn test_sequences_increase() {
        let db = memory_db("color");
        let a = db.insert(solid([1, 1, 1])).unwrap();
        let b = db.insert(solid([1, 1, 1])).unwrap();
        let seq = |id: RecordId| db.get(id).unwrap().unwrap().seq;
        assert!(seq(a) < seq(b));
    }

    #[test]
    fn test_auto_create_off() {
        let config = Config::new(DriverConfig::new("color"))
            .with_database(DatabaseConfig::new("memory").with_auto_create(false));
        let db = Database::open(config).unwrap();
        assert!(matches!(db.insert(solid([0, 0, 0])), Err(Error::NotFound(_))));
        db.create_database().unwrap();
        db.insert(solid([0, 0, 0])).unwrap();
    }

    #[test]
    fn test_stats_command() {
        let db = memory_db("color");
        db.insert(solid([9, 9, 9])).unwrap();
        let stats = db.invoke("stats", Value::Null).unwrap();
        assert_eq!(stats["records"], 1);
        assert_eq!(stats["store"], "memory");
        assert_eq!(stats["index"]["live"], 1);
    }

    #[test]
    fn test_close_twice() {
        let db = memory_db("color");
        db.close().unwrap();
        assert!(db.is_closed());
        assert!(matches!(db.close(), Err(Error::ClosedHandle)));
        assert!(matches!(db.len(), Err(Error::ClosedHandle)));
    }
}
