//! In-memory record store without persistence.

use std::collections::HashMap;

use parking_lot::RwLock;

use super::{missing_database, Record, RecordStore};
use crate::config::DatabaseConfig;
use crate::error::{Error, Result};
use crate::id::RecordId;

/// Record store that keeps everything in memory.
///
/// Used when a configuration has no `database` section, e.g. for pure
/// similarity computation. Contents are lost when the handle is closed.
#[derive(Debug)]
pub struct MemoryStore {
    namespace: String,
    /// `None` until created and after a drop.
    records: RwLock<Option<HashMap<RecordId, Record>>>,
}

impl MemoryStore {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            records: RwLock::new(None),
        }
    }
}

pub(crate) fn factory(_config: &DatabaseConfig, namespace: &str) -> Result<Box<dyn RecordStore>> {
    Ok(Box::new(MemoryStore::new(namespace)))
}

impl RecordStore for MemoryStore {
    fn kind(&self) -> &'static str {
        "memory"
    }

    fn create(&self) -> Result<()> {
        self.records.write().get_or_insert_with(HashMap::new);
        Ok(())
    }

    fn drop_all(&self) -> Result<bool> {
        Ok(self.records.write().take().is_some())
    }

    fn is_created(&self) -> Result<bool> {
        Ok(self.records.read().is_some())
    }

    fn put(&self, record: &Record) -> Result<()> {
        let mut guard = self.records.write();
        let records = guard
            .as_mut()
            .ok_or_else(|| missing_database(self.kind(), &self.namespace))?;
        if records.contains_key(&record.id) {
            return Err(Error::Storage(format!("duplicate record id {}", record.id)));
        }
        records.insert(record.id, record.clone());
        Ok(())
    }

    fn get(&self, id: &RecordId) -> Result<Option<Record>> {
        Ok(self
            .records
            .read()
            .as_ref()
            .and_then(|records| records.get(id).cloned()))
    }

    fn delete(&self, id: &RecordId) -> Result<bool> {
        let mut guard = self.records.write();
        let records = guard
            .as_mut()
            .ok_or_else(|| missing_database(self.kind(), &self.namespace))?;
        Ok(records.remove(id).is_some())
    }

    fn contains(&self, id: &RecordId) -> Result<bool> {
        Ok(self
            .records
            .read()
            .as_ref()
            .is_some_and(|records| records.contains_key(id)))
    }

    fn iter_all(&self) -> Result<Vec<Record>> {
        let guard = self.records.read();
        let records = guard
            .as_ref()
            .ok_or_else(|| missing_database(self.kind(), &self.namespace))?;
        let mut all: Vec<Record> = records.values().cloned().collect();
        all.sort_by_key(|r| r.seq);
        Ok(all)
    }

    fn len(&self) -> Result<usize> {
        Ok(self.records.read().as_ref().map_or(0, HashMap::len))
    }
}
