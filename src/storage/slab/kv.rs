//! Hybrid key-value store: records in the slab, keys in DRAM
//!
//! ```text
//! insert(r) ─→ index lock ─→ slab.insert ─(commit)─→ index[key] = slot
//! get(k)    ─→ index[k]   ─→ slab.get(slot)            (no transaction)
//! remove(k) ─→ index lock ─→ slab.remove ─(commit)─→ erase index[k]
//! ```
//!
//! The index lock is always taken before the slab lock, which serializes all
//! mutations of a key and keeps lock order consistent with rebuilds.

use super::index::DramIndex;
use super::slot::{Record, SlotId};
use super::store::{Slab, SlabStats};
use crate::config::SlabConfig;
use crate::error::{Error, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Key-value façade over a slab
///
/// `insert` never overwrites: an existing key makes it return `false`.
pub struct HybridKv<T: Record> {
    slab: Arc<Slab<T>>,
    index: DramIndex<T::Key>,
}

impl<T: Record> std::fmt::Debug for HybridKv<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridKv")
            .field("slab", &self.slab)
            .field("keys", &self.index.len())
            .finish()
    }
}

impl<T: Record> HybridKv<T> {
    /// Create a fresh store in `dir`
    pub fn create<P: AsRef<Path>>(dir: P, capacity_hint: u64, config: SlabConfig) -> Result<Self> {
        Self::new(Arc::new(Slab::create(dir, capacity_hint, config)?))
    }

    /// Open the store in `dir` and rebuild its index
    pub fn open<P: AsRef<Path>>(dir: P, config: SlabConfig) -> Result<Self> {
        Self::new(Arc::new(Slab::open(dir, config)?))
    }

    /// Wrap an open slab, building the index with one parallel scan
    pub fn new(slab: Arc<Slab<T>>) -> Result<Self> {
        let index = DramIndex::new();
        index.rebuild(&slab, slab.config().default_parallelism)?;
        info!(keys = index.len(), "Hybrid KV ready");
        Ok(Self { slab, index })
    }

    /// Insert `record` under its key. Returns `false` if the key is already present.
    pub fn insert(&self, record: T) -> Result<bool> {
        let key = record.key();
        let mut index = self.index.write();
        if index.contains_key(&key) {
            debug!(?key, "Key already exists");
            return Ok(false);
        }

        let slot = self.slab.insert(&record)?;
        index.insert(key, slot);
        debug!(?key, %slot, "Inserted key");
        Ok(true)
    }

    /// Remove `key`. Returns `false` if it was not present.
    pub fn remove(&self, key: &T::Key) -> Result<bool> {
        let mut index = self.index.write();
        let slot = match index.get(key) {
            Some(slot) => *slot,
            None => return Ok(false),
        };

        self.check_slot(key, slot)?;
        self.slab.remove(slot)?;
        index.remove(key);
        debug!(?key, %slot, "Removed key");
        Ok(true)
    }

    /// Record stored under `key`, read straight from its slot
    pub fn get(&self, key: &T::Key) -> Result<Option<T>> {
        let index = self.index.read();
        match index.get(key) {
            Some(slot) => self.check_slot(key, *slot).map(Some),
            None => Ok(None),
        }
    }

    /// Read `slot` and make sure it really holds `key`
    fn check_slot(&self, key: &T::Key, slot: SlotId) -> Result<T> {
        let record = self.slab.get(slot).map_err(|e| match e {
            Error::NotOccupied(_) => Error::Corruption(format!(
                "Index maps {:?} to vacant {}",
                key, slot
            )),
            other => other,
        })?;
        if record.key() != *key {
            return Err(Error::Corruption(format!(
                "Index maps {:?} to {} which holds {:?}",
                key,
                slot,
                record.key()
            )));
        }
        Ok(record)
    }

    pub fn contains_key(&self, key: &T::Key) -> bool {
        self.index.contains_key(key)
    }

    /// Slot currently holding `key`
    pub fn slot_of(&self, key: &T::Key) -> Option<SlotId> {
        self.index.get(key)
    }

    pub fn keys(&self) -> Vec<T::Key> {
        self.index.keys()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Parallel scan of every stored record. See [`Slab::foreach`].
    ///
    /// Holds the index shared lock for the whole scan: inserts and removes
    /// wait, while `get` from inside the callback still goes through.
    pub fn foreach<F>(&self, callback: F, parallelism: usize) -> Result<()>
    where
        F: Fn(SlotId, &T) + Sync,
    {
        let _index = self.index.read();
        self.slab.foreach(callback, parallelism)
    }

    /// Throw the index away and rebuild it from the slab
    pub fn rebuild_index(&self) -> Result<usize> {
        self.index
            .rebuild(&self.slab, self.slab.config().default_parallelism)
    }

    /// Copy of the key → slot mapping
    pub fn index_snapshot(&self) -> std::collections::HashMap<T::Key, SlotId> {
        self.index.snapshot()
    }

    pub fn slab(&self) -> &Arc<Slab<T>> {
        &self.slab
    }

    pub fn flush(&self) -> Result<()> {
        self.slab.flush()
    }

    pub fn stats(&self) -> KvStats {
        KvStats {
            keys: self.index.len(),
            slab: self.slab.stats(),
        }
    }
}

/// Key count plus the slab underneath
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KvStats {
    pub keys: usize,
    pub slab: SlabStats,
}
