//! DRAM index: key → slot
//!
//! Volatile and never persisted. It is always derived from one full scan of
//! the occupied slots, built off to the side and swapped in whole, so a
//! failed rebuild leaves the previous mapping in place.

use super::slot::{Record, SlotId};
use super::store::Slab;
use crate::error::{Error, Result};
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::HashMap;
use std::hash::Hash;
use tracing::info;

/// Key → slot mapping guarded by a single reader-writer lock
///
/// Readers take the lock recursively, so they never block while another
/// reader holds it.
#[derive(Debug)]
pub struct DramIndex<K> {
    map: RwLock<HashMap<K, SlotId>>,
}

impl<K> Default for DramIndex<K> {
    fn default() -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
        }
    }
}

impl<K: Copy + Eq + Hash + std::fmt::Debug + Send + Sync> DramIndex<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan `slab` in parallel and collect the key of every occupied slot.
    ///
    /// Two occupied slots holding the same key are `Corruption`.
    pub fn scan<T>(slab: &Slab<T>, parallelism: usize) -> Result<HashMap<K, SlotId>>
    where
        T: Record<Key = K>,
    {
        let staged = Mutex::new(HashMap::with_capacity(slab.occupied_count() as usize));
        slab.try_foreach(
            |slot, record| {
                let key = record.key();
                if let Some(existing) = staged.lock().insert(key, slot) {
                    return Err(Error::Corruption(format!(
                        "Key {:?} is stored in both {} and {}",
                        key, existing, slot
                    )));
                }
                Ok(())
            },
            parallelism,
        )?;
        Ok(staged.into_inner())
    }

    /// Replace the whole mapping with a fresh scan of `slab`.
    ///
    /// The write lock is held throughout, so no lookup sees a half-built index.
    pub fn rebuild<T>(&self, slab: &Slab<T>, parallelism: usize) -> Result<usize>
    where
        T: Record<Key = K>,
    {
        let mut map = self.map.write();
        let fresh = Self::scan(slab, parallelism)?;
        let keys = fresh.len();
        *map = fresh;
        info!(keys, parallelism, "Rebuilt DRAM index");
        Ok(keys)
    }

    pub fn get(&self, key: &K) -> Option<SlotId> {
        self.map.read_recursive().get(key).copied()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.map.read_recursive().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.map.read_recursive().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read_recursive().is_empty()
    }

    pub fn keys(&self) -> Vec<K> {
        self.map.read_recursive().keys().copied().collect()
    }

    /// Copy of the current mapping
    pub fn snapshot(&self) -> HashMap<K, SlotId> {
        self.map.read_recursive().clone()
    }

    /// Shared guard that does not queue behind a waiting writer, so a
    /// traversal callback can look keys up while the traversal holds it.
    pub(crate) fn read(&self) -> RwLockReadGuard<'_, HashMap<K, SlotId>> {
        self.map.read_recursive()
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, HashMap<K, SlotId>> {
        self.map.write()
    }
}
