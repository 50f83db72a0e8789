//! Transactional slot transitions
//!
//! ```text
//! Occupy (reused slot)   one batch: slot ← tag + record, header.free_head ← next
//! Occupy (appended slot) persist record past len, then one batch:
//!                        tag ← OCCUPIED, header.len ← len + 1
//! Vacate                 one batch: slot ← tag + link to old head,
//!                        header.free_head ← slot
//! ```
//!
//! The in-memory state is only updated once the batch has committed, so a
//! failed commit leaves the allocator exactly as it was.

use super::allocator::Allocation;
use super::layout::Header;
use super::slot::{Record, Slot, SlotId, TAG_OCCUPIED};
use super::store::{Slab, SlabState};
use crate::error::{Error, Result};
use std::sync::atomic::Ordering;
use tracing::{debug, warn};

impl<T: Record> Slab<T> {
    /// Store `record`, reusing the most recently freed slot if there is one
    pub fn insert(&self, record: &T) -> Result<SlotId> {
        self.ensure_writable()?;
        let mut state = self.state.write();

        let result = match self.allocate(&state)? {
            Allocation::Reuse { slot, next } => self.occupy_reused(&mut state, slot, next, record),
            Allocation::Append { slot } => self.occupy_appended(&mut state, slot, record),
        };
        self.note_failure(result)
    }

    /// Vacate `slot`, pushing it onto the free list. Returns the record it held.
    pub fn remove(&self, slot: SlotId) -> Result<T> {
        self.ensure_writable()?;
        let mut state = self.state.write();

        let result = self.vacate(&mut state, slot);
        self.note_failure(result)
    }

    fn occupy_reused(
        &self,
        state: &mut SlabState,
        slot: SlotId,
        next: Option<SlotId>,
        record: &T,
    ) -> Result<SlotId> {
        let header = state.header.with_free_head(next);
        let mut bytes = vec![0u8; self.layout.slot_size as usize];
        Slot::Occupied(*record).encode(&mut bytes);

        self.transactor.run(|tx| {
            tx.write(self.layout.slot_offset(slot), bytes);
            tx.write_pod(0, &header);
            Ok(())
        })?;

        state.header = header;
        state.vacant -= 1;
        debug!(%slot, "Occupied reused slot");
        Ok(slot)
    }

    fn occupy_appended(&self, state: &mut SlabState, slot: SlotId, record: &T) -> Result<SlotId> {
        self.ensure_capacity(state, slot.index() + 1)?;

        // Past len, so nothing can read the payload before the tag flips
        self.transactor
            .persist(self.layout.payload_offset(slot), bytemuck::bytes_of(record))?;

        let header = Header {
            len: state.header.len + 1,
            ..state.header
        };
        self.transactor.run(|tx| {
            tx.write(self.layout.slot_offset(slot), TAG_OCCUPIED.to_le_bytes().to_vec());
            tx.write_pod(0, &header);
            Ok(())
        })?;

        state.header = header;
        debug!(%slot, len = header.len, "Occupied appended slot");
        Ok(slot)
    }

    fn vacate(&self, state: &mut SlabState, slot: SlotId) -> Result<T> {
        let record = match self.read_slot_checked(state, slot)? {
            Slot::Occupied(record) => record,
            Slot::Vacant { .. } => return Err(Error::AlreadyVacant(slot.index())),
        };
        let (header, next) = self.deallocate(state, slot)?;

        let mut bytes = vec![0u8; self.layout.slot_size as usize];
        Slot::<T>::Vacant { next }.encode(&mut bytes);

        self.transactor.run(|tx| {
            tx.write(self.layout.slot_offset(slot), bytes);
            tx.write_pod(0, &header);
            Ok(())
        })?;

        state.header = header;
        state.vacant += 1;
        debug!(%slot, "Vacated slot");
        Ok(record)
    }

    fn read_slot_checked(&self, state: &SlabState, slot: SlotId) -> Result<Slot<T>> {
        Self::check_bounds(slot, state.header.len)?;
        self.read_slot(slot)
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.poisoned.load(Ordering::Acquire) {
            return Err(Error::Poisoned(
                "An earlier commit did not finish; reopen the slab to recover".to_string(),
            ));
        }
        Ok(())
    }

    fn note_failure<R>(&self, result: Result<R>) -> Result<R> {
        if let Err(Error::Poisoned(reason)) = &result {
            warn!(%reason, "Slab poisoned");
            self.poisoned.store(true, Ordering::Release);
        }
        result
    }
}
