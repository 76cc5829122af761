//! Flat index for exact similarity search.
//!
//! Entries are kept in insertion order. Removing an entry only marks its
//! slot in a tombstone bitmap; [`FlatIndex::vacuum`] rewrites the slot
//! vector without them. Search scores every live entry and keeps the best
//! `k` in a bounded heap.
//!
//! The state sits behind `RwLock<Arc<_>>`. Searches clone the `Arc` and
//! scan without holding the lock, while writers copy the state on write if
//! a search still holds the old one. A rebuild builds the new state off-lock
//! and swaps it in, so a concurrent search sees either the old or the new
//! contents, never a mix.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use roaring::RoaringBitmap;

use crate::error::{Error, Result};
use crate::feature::FeatureVector;
use crate::id::RecordId;
use crate::storage::Record;

/// An indexed feature vector.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub id: RecordId,
    pub seq: u64,
    pub feature: FeatureVector,
}

impl From<Record> for IndexEntry {
    fn from(record: Record) -> Self {
        Self {
            id: record.id,
            seq: record.seq,
            feature: record.feature,
        }
    }
}

/// One match from [`FlatIndex::search`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchHit {
    pub id: RecordId,
    pub seq: u64,
    pub similarity: f32,
}

/// Counters reported by `stats`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct IndexStats {
    /// Searchable entries.
    pub live: usize,
    /// Removed entries still occupying a slot.
    pub tombstones: usize,
    pub slots: usize,
}

/// Immutable view of the index contents.
#[derive(Debug, Clone, Default)]
pub struct IndexState {
    entries: Vec<IndexEntry>,
    slots: HashMap<RecordId, u32>,
    tombstones: RoaringBitmap,
}

impl IndexState {
    fn from_entries(entries: Vec<IndexEntry>) -> Result<Self> {
        let mut state = Self::default();
        for entry in entries {
            state.push(entry)?;
        }
        Ok(state)
    }

    fn push(&mut self, entry: IndexEntry) -> Result<()> {
        if self.slots.contains_key(&entry.id) {
            return Err(Error::InvalidArgument(format!(
                "record {} is already indexed",
                entry.id
            )));
        }
        let slot = u32::try_from(self.entries.len())
            .map_err(|_| Error::InvalidArgument("index is full".to_string()))?;
        self.slots.insert(entry.id, slot);
        self.entries.push(entry);
        Ok(())
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn contains(&self, id: &RecordId) -> bool {
        self.slots.contains_key(id)
    }

    pub fn get(&self, id: &RecordId) -> Option<&IndexEntry> {
        self.slots.get(id).map(|&slot| &self.entries[slot as usize])
    }

    /// Live entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &IndexEntry> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter(|(slot, _)| !self.tombstones.contains(*slot as u32))
            .map(|(_, entry)| entry)
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            live: self.len(),
            tombstones: self.tombstones.len() as usize,
            slots: self.entries.len(),
        }
    }

    /// The `k` best live entries by `score(query, entry)`, best first.
    ///
    /// Ties go to the entry inserted first, so the result equals a full
    /// sort by (similarity descending, seq ascending) truncated to `k`.
    pub fn search<F>(&self, query: &FeatureVector, k: usize, score: F) -> Vec<SearchHit>
    where
        F: Fn(&FeatureVector, &FeatureVector) -> f32,
    {
        if k == 0 {
            return Vec::new();
        }

        let mut heap: BinaryHeap<Candidate> = BinaryHeap::with_capacity(k.min(self.len()) + 1);
        for entry in self.iter() {
            let candidate = Candidate(SearchHit {
                id: entry.id,
                seq: entry.seq,
                similarity: score(query, &entry.feature),
            });
            if heap.len() < k {
                heap.push(candidate);
            } else if heap.peek().is_some_and(|worst| candidate < *worst) {
                heap.pop();
                heap.push(candidate);
            }
        }

        heap.into_sorted_vec().into_iter().map(|c| c.0).collect()
    }
}

/// Heap element ordered worst-first so the heap top is the one to evict.
#[derive(Debug, Clone, Copy)]
struct Candidate(SearchHit);

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        // Lower similarity = worse = greater; later insertion loses ties.
        other
            .0
            .similarity
            .total_cmp(&self.0.similarity)
            .then(self.0.seq.cmp(&other.0.seq))
    }
}

/// Exact, snapshot-safe similarity index.
#[derive(Debug, Default)]
pub struct FlatIndex {
    state: RwLock<Arc<IndexState>>,
}

impl FlatIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an index from records in insertion order.
    pub fn from_records(records: Vec<Record>) -> Result<Self> {
        let state = IndexState::from_entries(records.into_iter().map(IndexEntry::from).collect())?;
        Ok(Self {
            state: RwLock::new(Arc::new(state)),
        })
    }

    /// The current contents. Later writes do not affect the snapshot.
    pub fn snapshot(&self) -> Arc<IndexState> {
        Arc::clone(&self.state.read())
    }

    pub fn len(&self) -> usize {
        self.state.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().is_empty()
    }

    pub fn contains(&self, id: &RecordId) -> bool {
        self.state.read().contains(id)
    }

    pub fn stats(&self) -> IndexStats {
        self.state.read().stats()
    }

    /// Adds an entry. Fails with `InvalidArgument` if the id is present.
    pub fn insert(&self, entry: IndexEntry) -> Result<()> {
        let mut guard = self.state.write();
        Arc::make_mut(&mut guard).push(entry)
    }

    /// Tombstones an entry. Returns false if it was not indexed.
    pub fn remove(&self, id: &RecordId) -> bool {
        let mut guard = self.state.write();
        if !guard.contains(id) {
            return false;
        }
        let state = Arc::make_mut(&mut guard);
        if let Some(slot) = state.slots.remove(id) {
            state.tombstones.insert(slot);
        }
        true
    }

    /// Replaces the contents with `records`.
    pub fn rebuild(&self, records: Vec<Record>) -> Result<()> {
        let fresh = IndexState::from_entries(records.into_iter().map(IndexEntry::from).collect())?;
        *self.state.write() = Arc::new(fresh);
        Ok(())
    }

    pub fn clear(&self) {
        *self.state.write() = Arc::new(IndexState::default());
    }

    /// Drops tombstoned slots. Returns how many were reclaimed.
    pub fn vacuum(&self) -> usize {
        let current = self.snapshot();
        let reclaimed = current.tombstones.len() as usize;
        if reclaimed == 0 {
            return 0;
        }
        let live: Vec<IndexEntry> = current.iter().cloned().collect();
        // Entries were unique in the old state.
        let mut fresh = IndexState::default();
        for entry in live {
            fresh.slots.insert(entry.id, fresh.entries.len() as u32);
            fresh.entries.push(entry);
        }

        let mut guard = self.state.write();
        if Arc::ptr_eq(&guard, &current) {
            *guard = Arc::new(fresh);
            reclaimed
        } else {
            // A writer got in between; leave the tombstones for next time.
            0
        }
    }

    pub fn search<F>(&self, query: &FeatureVector, k: usize, score: F) -> Vec<SearchHit>
    where
        F: Fn(&FeatureVector, &FeatureVector) -> f32,
    {
        self.snapshot().search(query, k, score)
    }
}
