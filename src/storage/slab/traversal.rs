//! Parallel traversal over occupied slots
//!
//! `[0, len)` is cut into contiguous ranges by index arithmetic alone, one
//! task per range on the slab's rayon pool:
//!
//! ```text
//! len = 10, parallelism = 3
//!   [0..3)  [3..6)  [6..10)      ← remainder folded into the last range
//! ```
//!
//! Each task reads its range in batches and calls back for every occupied
//! slot in ascending order. Nothing is promised about order across ranges.
//! The slab's shared lock is held for the whole traversal, so callers see a
//! consistent snapshot and inserts/removes wait until it returns.

use super::slot::{Record, Slot, SlotId};
use super::store::Slab;
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};

/// Slots read from the media per batch
const SCAN_BATCH_SLOTS: u64 = 256;

/// Split `[0, len)` into at most `parallelism` contiguous ranges
///
/// Fewer ranges are produced when there are fewer slots than workers, and
/// none at all for an empty slab.
pub fn partition(len: u64, parallelism: usize) -> Vec<Range<u64>> {
    if len == 0 {
        return Vec::new();
    }
    let parts = (parallelism.max(1) as u64).min(len);
    let size = len / parts;
    (0..parts)
        .map(|i| {
            let start = i * size;
            let end = if i == parts - 1 { len } else { start + size };
            start..end
        })
        .collect()
}

impl<T: Record> Slab<T> {
    /// Call `callback` for every occupied slot, `parallelism` ranges at a time.
    ///
    /// Blocks until every range is done. The callback runs on pool threads
    /// concurrently and must not insert into or remove from this slab.
    pub fn foreach<F>(&self, callback: F, parallelism: usize) -> Result<()>
    where
        F: Fn(SlotId, &T) + Sync,
    {
        self.try_foreach(
            |slot, record| {
                callback(slot, record);
                Ok(())
            },
            parallelism,
        )
    }

    /// Like [`Slab::foreach`], but stops at the first error from the
    /// callback or the media and returns it.
    pub fn try_foreach<F>(&self, callback: F, parallelism: usize) -> Result<()>
    where
        F: Fn(SlotId, &T) -> Result<()> + Sync,
    {
        let state = self.state.read_recursive();
        let ranges = partition(state.header.len, parallelism);

        let failure: Mutex<Option<Error>> = Mutex::new(None);
        let stop = AtomicBool::new(false);

        self.pool.scope(|scope| {
            for range in ranges {
                let callback = &callback;
                let failure = &failure;
                let stop = &stop;
                scope.spawn(move |_| {
                    if let Err(e) = self.scan_range(range, callback, stop) {
                        stop.store(true, Ordering::Relaxed);
                        let mut failure = failure.lock();
                        if failure.is_none() {
                            *failure = Some(e);
                        }
                    }
                });
            }
        });
        drop(state);

        match failure.into_inner() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn scan_range<F>(&self, range: Range<u64>, callback: &F, stop: &AtomicBool) -> Result<()>
    where
        F: Fn(SlotId, &T) -> Result<()>,
    {
        let slot_size = self.layout.slot_size as usize;
        let mut buf = Vec::new();
        let mut start = range.start;

        while start < range.end {
            if stop.load(Ordering::Relaxed) {
                return Ok(());
            }
            let end = (start + SCAN_BATCH_SLOTS).min(range.end);
            buf.resize((end - start) as usize * slot_size, 0);
            self.data
                .read_at(self.layout.slot_offset(SlotId::new(start)), &mut buf)?;

            for (i, bytes) in buf.chunks_exact(slot_size).enumerate() {
                let slot = SlotId::new(start + i as u64);
                if let Slot::Occupied(record) = Slot::<T>::decode(slot, bytes)? {
                    callback(slot, &record)?;
                }
            }
            start = end;
        }
        Ok(())
    }
}
