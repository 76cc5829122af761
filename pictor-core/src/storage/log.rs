//! Append-only record log.
//!
//! Each namespace owns a directory `<path>/<namespace>/` holding a single
//! `records.log`. Every mutation is appended as a checksummed frame and the
//! log is replayed into an ordered map on open. Frames appended by other
//! processes are picked up incrementally on the next read.
//!
//! # Format
//!
//! Each frame has the format:
//! ```text
//! [checksum:u32][length:u32][entry:json]
//! ```
//!
//! A truncated frame at the tail (a torn or in-progress write) is left
//! unread until it is complete; a checksum mismatch is reported as
//! corruption.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::{missing_database, CompactStats, Record, RecordStore};
use crate::config::DatabaseConfig;
use crate::error::{Error, Result};
use crate::id::RecordId;

const LOG_FILE: &str = "records.log";
const COMPACT_FILE: &str = "records.log.compact";
const FRAME_HEADER: u64 = 8;

/// Sync mode for log appends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Sync after every append (safest, slowest).
    Immediate,
    /// Sync after a batch of appends.
    #[default]
    Batched,
    /// Never sync explicitly (fastest, risk of data loss on crash).
    #[serde(rename = "none")]
    NoSync,
}

/// A single log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum LogEntry {
    Put { record: Record },
    Delete { id: RecordId },
}

impl LogEntry {
    fn apply(self, records: &mut BTreeMap<RecordId, Record>) {
        match self {
            LogEntry::Put { record } => {
                records.insert(record.id, record);
            }
            LogEntry::Delete { id } => {
                records.remove(&id);
            }
        }
    }
}

/// Encodes an entry as a complete frame so it can be written with one call.
fn encode_frame(entry: &LogEntry) -> Result<Vec<u8>> {
    let data = serde_json::to_vec(entry)
        .map_err(|e| Error::Storage(format!("log entry serialization failed: {}", e)))?;
    let mut frame = Vec::with_capacity(FRAME_HEADER as usize + data.len());
    frame.extend_from_slice(&crc32fast::hash(&data).to_le_bytes());
    frame.extend_from_slice(&(data.len() as u32).to_le_bytes());
    frame.extend_from_slice(&data);
    Ok(frame)
}

/// Device and inode of a log file, used to notice when another handle
/// replaced or removed it.
#[cfg(unix)]
fn file_identity(meta: &fs::Metadata) -> Option<(u64, u64)> {
    use std::os::unix::fs::MetadataExt;
    Some((meta.dev(), meta.ino()))
}

#[cfg(not(unix))]
fn file_identity(_meta: &fs::Metadata) -> Option<(u64, u64)> {
    None
}

struct LogState {
    writer: Option<File>,
    /// Identity of the log file replayed so far.
    file_id: Option<(u64, u64)>,
    records: BTreeMap<RecordId, Record>,
    /// Offset just past the last complete frame replayed.
    read_pos: u64,
    entries_since_sync: usize,
}

/// Durable ordered key-value record store backed by an append-only log.
///
/// Compaction rewrites the log in place and is only safe while no other
/// process is appending to the same namespace.
pub struct LogStore {
    namespace: String,
    dir: PathBuf,
    sync_mode: SyncMode,
    batch_size: usize,
    state: Mutex<LogState>,
}

pub(crate) fn factory(config: &DatabaseConfig, namespace: &str) -> Result<Box<dyn RecordStore>> {
    let root = config.require_path()?;
    let batch_size = match config.params.get_i64("batch_size") {
        Some(n) if n > 0 => n as usize,
        Some(n) => {
            return Err(Error::Configuration(format!(
                "batch_size must be positive, got {}",
                n
            )))
        }
        None => 100,
    };
    let store = LogStore::open(root, namespace, config.sync)?.with_batch_size(batch_size);
    Ok(Box::new(store))
}

impl LogStore {
    /// Opens the log for `namespace` under `root`, replaying it if present.
    ///
    /// `root` itself is created on [`create`](RecordStore::create), but its
    /// parent directory must exist.
    pub fn open<P: AsRef<Path>>(root: P, namespace: &str, sync_mode: SyncMode) -> Result<Self> {
        let root = root.as_ref();
        if let Some(parent) = root.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !parent.is_dir() {
                return Err(Error::Configuration(format!(
                    "log store directory {} is unreachable: {} does not exist",
                    root.display(),
                    parent.display()
                )));
            }
        }

        let store = Self {
            namespace: namespace.to_string(),
            dir: root.join(namespace),
            sync_mode,
            batch_size: 100,
            state: Mutex::new(LogState {
                writer: None,
                file_id: None,
                records: BTreeMap::new(),
                read_pos: 0,
                entries_since_sync: 0,
            }),
        };

        {
            let mut state = store.state.lock();
            store.catch_up(&mut state)?;
        }
        Ok(store)
    }

    /// Sets how many appends may pass between syncs in batched mode.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Returns the directory holding this namespace's log.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn log_path(&self) -> PathBuf {
        self.dir.join(LOG_FILE)
    }

    /// Replays complete frames appended since the last read.
    fn catch_up(&self, state: &mut LogState) -> Result<()> {
        let path = self.log_path();
        let mut file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Dropped by another handle.
                Self::reset(state);
                return Ok(());
            }
            Err(e) => return Err(Error::Storage(format!("failed to open log: {}", e))),
        };
        let meta = file
            .metadata()
            .map_err(|e| Error::Storage(format!("metadata failed: {}", e)))?;
        let file_id = file_identity(&meta);
        let file_len = meta.len();
        let replaced = matches!((state.file_id, file_id), (Some(old), Some(new)) if old != new);
        if replaced || file_len < state.read_pos {
            // Replaced by a drop or compaction elsewhere; replay from the start.
            tracing::debug!(namespace = %self.namespace, "log replaced, replaying from start");
            Self::reset(state);
        }
        state.file_id = file_id;
        if file_len <= state.read_pos {
            return Ok(());
        }

        file.seek(SeekFrom::Start(state.read_pos))
            .map_err(|e| Error::Storage(format!("seek failed: {}", e)))?;
        let mut buf = Vec::with_capacity((file_len - state.read_pos) as usize);
        file.read_to_end(&mut buf)
            .map_err(|e| Error::Storage(format!("read log failed: {}", e)))?;

        let mut pos = 0usize;
        let mut replayed = 0usize;
        while buf.len() - pos >= FRAME_HEADER as usize {
            let expected = u32::from_le_bytes([buf[pos], buf[pos + 1], buf[pos + 2], buf[pos + 3]]);
            let length =
                u32::from_le_bytes([buf[pos + 4], buf[pos + 5], buf[pos + 6], buf[pos + 7]]) as usize;
            let start = pos + FRAME_HEADER as usize;
            let Some(data) = buf.get(start..start + length) else {
                break;
            };

            let actual = crc32fast::hash(data);
            if actual != expected {
                return Err(Error::Storage(format!(
                    "log {} corrupted at offset {}: checksum mismatch (expected {}, got {})",
                    path.display(),
                    state.read_pos + pos as u64,
                    expected,
                    actual
                )));
            }
            let entry: LogEntry = serde_json::from_slice(data).map_err(|e| {
                Error::Storage(format!(
                    "log {} corrupted at offset {}: {}",
                    path.display(),
                    state.read_pos + pos as u64,
                    e
                ))
            })?;
            entry.apply(&mut state.records);
            pos = start + length;
            replayed += 1;
        }

        if pos < buf.len() {
            tracing::warn!(
                path = %path.display(),
                pending_bytes = buf.len() - pos,
                "incomplete frame at log tail, leaving it for a later read"
            );
        }
        state.read_pos += pos as u64;
        if replayed > 0 {
            tracing::debug!(namespace = %self.namespace, replayed, "replayed log frames");
        }
        Ok(())
    }

    /// Forgets everything read from the log, including the append handle.
    fn reset(state: &mut LogState) {
        state.writer = None;
        state.file_id = None;
        state.records.clear();
        state.read_pos = 0;
        state.entries_since_sync = 0;
    }

    /// Opens the append handle, failing if the log does not exist.
    fn writer<'a>(&self, state: &'a mut LogState) -> Result<&'a mut File> {
        if state.writer.is_none() {
            let path = self.log_path();
            if !path.exists() {
                return Err(missing_database(self.kind(), &self.namespace));
            }
            let file = OpenOptions::new()
                .append(true)
                .open(&path)
                .map_err(|e| Error::Storage(format!("failed to open log for append: {}", e)))?;
            state.writer = Some(file);
        }
        state
            .writer
            .as_mut()
            .ok_or_else(|| missing_database(self.kind(), &self.namespace))
    }

    fn append(&self, state: &mut LogState, entry: &LogEntry) -> Result<()> {
        let frame = encode_frame(entry)?;
        let sync_mode = self.sync_mode;
        let batch_size = self.batch_size;

        let writer = self.writer(state)?;
        writer
            .write_all(&frame)
            .map_err(|e| Error::Storage(format!("log append failed: {}", e)))?;

        state.entries_since_sync += 1;
        match sync_mode {
            SyncMode::Immediate => Self::sync(state)?,
            SyncMode::Batched if state.entries_since_sync >= batch_size => Self::sync(state)?,
            _ => {}
        }
        Ok(())
    }

    fn sync(state: &mut LogState) -> Result<()> {
        if let Some(writer) = state.writer.as_mut() {
            writer
                .sync_all()
                .map_err(|e| Error::Storage(format!("log sync failed: {}", e)))?;
        }
        state.entries_since_sync = 0;
        Ok(())
    }

    fn file_len(path: &Path) -> u64 {
        fs::metadata(path).map(|m| m.len()).unwrap_or(0)
    }
}

impl RecordStore for LogStore {
    fn kind(&self) -> &'static str {
        "log"
    }

    fn create(&self) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| {
            Error::Storage(format!("create dir {} failed: {}", self.dir.display(), e))
        })?;
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path())
            .map_err(|e| Error::Storage(format!("create log failed: {}", e)))?;
        Ok(())
    }

    fn drop_all(&self) -> Result<bool> {
        let mut state = self.state.lock();
        Self::reset(&mut state);

        if !self.dir.exists() {
            return Ok(false);
        }
        let existed = self.log_path().exists();
        fs::remove_dir_all(&self.dir).map_err(|e| {
            Error::Storage(format!("remove dir {} failed: {}", self.dir.display(), e))
        })?;
        Ok(existed)
    }

    fn is_created(&self) -> Result<bool> {
        Ok(self.log_path().is_file())
    }

    fn put(&self, record: &Record) -> Result<()> {
        let mut state = self.state.lock();
        self.catch_up(&mut state)?;
        if state.records.contains_key(&record.id) {
            return Err(Error::Storage(format!("duplicate record id {}", record.id)));
        }
        self.append(
            &mut state,
            &LogEntry::Put {
                record: record.clone(),
            },
        )?;
        state.records.insert(record.id, record.clone());
        Ok(())
    }

    fn get(&self, id: &RecordId) -> Result<Option<Record>> {
        let mut state = self.state.lock();
        self.catch_up(&mut state)?;
        Ok(state.records.get(id).cloned())
    }

    fn delete(&self, id: &RecordId) -> Result<bool> {
        let mut state = self.state.lock();
        if !self.log_path().exists() {
            return Err(missing_database(self.kind(), &self.namespace));
        }
        self.catch_up(&mut state)?;
        if !state.records.contains_key(id) {
            return Ok(false);
        }
        self.append(&mut state, &LogEntry::Delete { id: *id })?;
        state.records.remove(id);
        Ok(true)
    }

    fn contains(&self, id: &RecordId) -> Result<bool> {
        let mut state = self.state.lock();
        self.catch_up(&mut state)?;
        Ok(state.records.contains_key(id))
    }

    fn iter_all(&self) -> Result<Vec<Record>> {
        let mut state = self.state.lock();
        if !self.log_path().exists() {
            return Err(missing_database(self.kind(), &self.namespace));
        }
        self.catch_up(&mut state)?;
        let mut all: Vec<Record> = state.records.values().cloned().collect();
        all.sort_by_key(|r| r.seq);
        Ok(all)
    }

    fn len(&self) -> Result<usize> {
        let mut state = self.state.lock();
        self.catch_up(&mut state)?;
        Ok(state.records.len())
    }

    fn flush(&self) -> Result<()> {
        let mut state = self.state.lock();
        Self::sync(&mut state)
    }

    fn compact(&self) -> Result<CompactStats> {
        let mut state = self.state.lock();
        let path = self.log_path();
        if !path.exists() {
            return Err(missing_database(self.kind(), &self.namespace));
        }
        self.catch_up(&mut state)?;
        let bytes_before = Self::file_len(&path);

        let compact_path = self.dir.join(COMPACT_FILE);
        let live_records = {
            let mut live: Vec<&Record> = state.records.values().collect();
            live.sort_by_key(|r| r.seq);

            let mut out = File::create(&compact_path)
                .map_err(|e| Error::Storage(format!("create compact log failed: {}", e)))?;
            for record in &live {
                let frame = encode_frame(&LogEntry::Put {
                    record: (*record).clone(),
                })?;
                out.write_all(&frame)
                    .map_err(|e| Error::Storage(format!("write compact log failed: {}", e)))?;
            }
            out.sync_all()
                .map_err(|e| Error::Storage(format!("sync compact log failed: {}", e)))?;
            live.len()
        };

        state.writer = None;
        fs::rename(&compact_path, &path)
            .map_err(|e| Error::Storage(format!("replace log failed: {}", e)))?;

        let bytes_after = Self::file_len(&path);
        state.file_id = fs::metadata(&path).ok().as_ref().and_then(file_identity);
        state.read_pos = bytes_after;
        state.entries_since_sync = 0;

        let stats = CompactStats {
            live_records,
            bytes_before,
            bytes_after,
        };
        tracing::info!(
            namespace = %self.namespace,
            live = stats.live_records,
            bytes_before,
            bytes_after,
            "compacted record log"
        );
        Ok(stats)
    }

    fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        Self::sync(&mut state)?;
        state.writer = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::{exercise_store, record};
    use std::sync::atomic::{AtomicU64, Ordering};

    static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

    fn temp_log_root() -> PathBuf {
        let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        let dir = std::env::temp_dir()
            .join("pictor_test_log")
            .join(format!("log_{}_{}", std::process::id(), id));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(dir.parent().unwrap()).unwrap();
        dir
    }

    #[test]
    fn test_log_store_contract() {
        let root = temp_log_root();
        let store = LogStore::open(&root, "ns", SyncMode::Immediate).unwrap();
        exercise_store(&store);
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn test_log_persistence() {
        let root = temp_log_root();
        let a = record(1, vec![1.0, 2.0, 3.0]);
        let b = record(2, vec![4.0, 5.0, 6.0]);

        {
            let store = LogStore::open(&root, "ns", SyncMode::Batched).unwrap();
            store.create().unwrap();
            store.put(&a).unwrap();
            store.put(&b).unwrap();
            store.delete(&a.id).unwrap();
            store.close().unwrap();
        }

        let store = LogStore::open(&root, "ns", SyncMode::Batched).unwrap();
        let all = store.iter_all().unwrap();
        assert_eq!(all, vec![b]);

        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn test_namespaces_are_isolated() {
        let root = temp_log_root();
        let one = LogStore::open(&root, "one", SyncMode::NoSync).unwrap();
        let two = LogStore::open(&root, "two", SyncMode::NoSync).unwrap();
        one.create().unwrap();
        two.create().unwrap();

        let r = record(1, vec![1.0]);
        one.put(&r).unwrap();
        assert!(one.contains(&r.id).unwrap());
        assert!(!two.contains(&r.id).unwrap());

        one.drop_all().unwrap();
        assert!(two.is_created().unwrap());

        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn test_sees_appends_from_another_handle() {
        let root = temp_log_root();
        let reader = LogStore::open(&root, "ns", SyncMode::NoSync).unwrap();
        reader.create().unwrap();
        let writer = LogStore::open(&root, "ns", SyncMode::NoSync).unwrap();

        let r = record(7, vec![0.5]);
        writer.put(&r).unwrap();
        assert_eq!(reader.get(&r.id).unwrap(), Some(r.clone()));

        writer.delete(&r.id).unwrap();
        assert!(reader.iter_all().unwrap().is_empty());

        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn test_torn_tail_is_ignored() {
        let root = temp_log_root();
        let r = record(1, vec![1.0]);
        {
            let store = LogStore::open(&root, "ns", SyncMode::Immediate).unwrap();
            store.create().unwrap();
            store.put(&r).unwrap();
        }

        // Half of a second frame.
        let frame = encode_frame(&LogEntry::Put {
            record: record(2, vec![2.0]),
        })
        .unwrap();
        let mut file = OpenOptions::new()
            .append(true)
            .open(root.join("ns").join(LOG_FILE))
            .unwrap();
        file.write_all(&frame[..frame.len() / 2]).unwrap();

        let store = LogStore::open(&root, "ns", SyncMode::Immediate).unwrap();
        assert_eq!(store.iter_all().unwrap(), vec![r]);

        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn test_checksum_mismatch_is_corruption() {
        let root = temp_log_root();
        {
            let store = LogStore::open(&root, "ns", SyncMode::Immediate).unwrap();
            store.create().unwrap();
            store.put(&record(1, vec![1.0])).unwrap();
        }

        let path = root.join("ns").join(LOG_FILE);
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 2;
        bytes[last] ^= 0xff;
        fs::write(&path, bytes).unwrap();

        let err = LogStore::open(&root, "ns", SyncMode::Immediate).err().unwrap();
        assert!(matches!(err, Error::Storage(_)));

        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn test_compact_drops_deleted_records() {
        let root = temp_log_root();
        let store = LogStore::open(&root, "ns", SyncMode::NoSync).unwrap();
        store.create().unwrap();

        let keep = record(1, vec![1.0]);
        store.put(&keep).unwrap();
        for seq in 2..10 {
            let r = record(seq, vec![seq as f32]);
            store.put(&r).unwrap();
            store.delete(&r.id).unwrap();
        }

        let stats = store.compact().unwrap();
        assert_eq!(stats.live_records, 1);
        assert!(stats.bytes_after < stats.bytes_before);

        // Appends continue after compaction and survive a reopen.
        let later = record(10, vec![10.0]);
        store.put(&later).unwrap();
        drop(store);

        let store = LogStore::open(&root, "ns", SyncMode::NoSync).unwrap();
        assert_eq!(store.iter_all().unwrap(), vec![keep, later]);

        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn test_append_after_drop_by_another_handle_fails() {
        let root = temp_log_root();
        let a = LogStore::open(&root, "ns", SyncMode::NoSync).unwrap();
        a.create().unwrap();
        a.put(&record(1, vec![1.0])).unwrap();

        let b = LogStore::open(&root, "ns", SyncMode::NoSync).unwrap();
        assert!(b.drop_all().unwrap());

        let err = a.put(&record(2, vec![2.0])).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)), "{:?}", err);
        assert!(!a.is_created().unwrap());

        // Recreating the log makes the stale handle usable again.
        b.create().unwrap();
        let r = record(3, vec![3.0]);
        a.put(&r).unwrap();
        assert_eq!(b.iter_all().unwrap(), vec![r]);

        let _ = fs::remove_dir_all(&root);
    }

    #[cfg(unix)]
    #[test]
    fn test_append_after_compaction_by_another_handle() {
        let root = temp_log_root();
        let a = LogStore::open(&root, "ns", SyncMode::NoSync).unwrap();
        a.create().unwrap();
        let first = record(1, vec![1.0]);
        a.put(&first).unwrap();

        let b = LogStore::open(&root, "ns", SyncMode::NoSync).unwrap();
        b.compact().unwrap();

        let second = record(2, vec![2.0]);
        a.put(&second).unwrap();
        assert_eq!(b.iter_all().unwrap(), vec![first.clone(), second.clone()]);

        let reopened = LogStore::open(&root, "ns", SyncMode::NoSync).unwrap();
        assert_eq!(reopened.iter_all().unwrap(), vec![first, second]);

        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn test_unreachable_root() {
        let err = LogStore::open("/nonexistent/pictor/root", "ns", SyncMode::Batched)
            .err()
            .unwrap();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
