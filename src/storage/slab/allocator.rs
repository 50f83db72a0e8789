//! Free-list allocator
//!
//! Vacant slots form a singly-linked list threaded through their own
//! payloads, rooted at the header's `free_head`:
//!
//! ```text
//! free_head ─→ Slot 7 ─→ Slot 2 ─→ Slot 4 ─→ (end)
//! ```
//!
//! Allocation pops the head, so the most recently freed slot is reused
//! first; only an empty list grows the slab. The functions here only
//! decide what should happen. `mutator.rs` commits the decision.

use super::layout::Header;
use super::slot::{Record, Slot, SlotId};
use super::store::{Slab, SlabState, SlabStats};
use crate::error::{Error, Result};
use std::sync::atomic::{AtomicU64, Ordering};

/// Where the next record goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Allocation {
    /// Pop `slot` off the free list; `next` becomes the new head
    Reuse { slot: SlotId, next: Option<SlotId> },
    /// Free list is empty, append a slot at the end
    Append { slot: SlotId },
}

impl<T: Record> Slab<T> {
    pub(crate) fn allocate(&self, state: &SlabState) -> Result<Allocation> {
        let len = state.header.len;
        let head = match state.header.free_head() {
            Some(head) => head,
            None => {
                return Ok(Allocation::Append {
                    slot: SlotId::new(len),
                })
            }
        };

        Self::check_bounds(head, len)?;
        match self.read_slot(head)? {
            Slot::Vacant { next } => {
                if let Some(next) = next {
                    if next.index() >= len {
                        return Err(Error::Corruption(format!(
                            "{} links to {} outside the slab (len {})",
                            head, next, len
                        )));
                    }
                }
                Ok(Allocation::Reuse { slot: head, next })
            }
            Slot::Occupied(_) => Err(Error::Corruption(format!(
                "Free list head {} is occupied",
                head
            ))),
        }
    }

    /// Push `slot` onto the free list. Returns the new header and the link the
    /// vacated slot must carry (the previous head).
    pub(crate) fn deallocate(&self, state: &SlabState, slot: SlotId) -> Result<(Header, Option<SlotId>)> {
        Self::check_bounds(slot, state.header.len)?;
        if let Slot::Vacant { .. } = self.read_slot(slot)? {
            return Err(Error::AlreadyVacant(slot.index()));
        }
        let next = state.header.free_head();
        Ok((state.header.with_free_head(Some(slot)), next))
    }

    /// Vacant slots in free-list order, most recently freed first
    pub fn free_list(&self) -> Result<Vec<SlotId>> {
        let state = self.state.read_recursive();
        self.walk_free_list(&state.header)
    }

    /// Follow the free list from `header`, rejecting links out of range,
    /// occupied members and cycles.
    pub(crate) fn walk_free_list(&self, header: &Header) -> Result<Vec<SlotId>> {
        let len = header.len;
        let mut members = Vec::new();
        let mut cursor = header.free_head();

        while let Some(slot) = cursor {
            if slot.index() >= len {
                return Err(Error::Corruption(format!(
                    "Free list reaches {} outside the slab (len {})",
                    slot, len
                )));
            }
            // A simple list cannot have more members than there are slots
            if members.len() as u64 == len {
                return Err(Error::Corruption(format!(
                    "Free list has a cycle through {}",
                    slot
                )));
            }
            match self.read_slot(slot)? {
                Slot::Vacant { next } => {
                    members.push(slot);
                    cursor = next;
                }
                Slot::Occupied(_) => {
                    return Err(Error::Corruption(format!(
                        "Free list reaches occupied {}",
                        slot
                    )))
                }
            }
        }

        Ok(members)
    }

    /// Full consistency check: the free list is a simple in-range chain and
    /// its members are exactly the slots tagged vacant.
    pub fn verify(&self) -> Result<SlabStats> {
        let state = self.state.read_recursive();
        let listed = self.walk_free_list(&state.header)?.len() as u64;

        let occupied = AtomicU64::new(0);
        self.foreach(
            |_, _| {
                occupied.fetch_add(1, Ordering::Relaxed);
            },
            self.config().default_parallelism,
        )?;
        let occupied = occupied.into_inner();
        let tagged_vacant = state.header.len - occupied;

        // Every listed slot is vacant and listed once, so equal counts mean equal sets
        if listed != tagged_vacant {
            return Err(Error::Corruption(format!(
                "Free list holds {} slots but {} are tagged vacant",
                listed, tagged_vacant
            )));
        }

        Ok(SlabStats {
            len: state.header.len,
            occupied,
            vacant: listed,
            capacity: state.capacity,
            slot_size: self.layout.slot_size,
        })
    }
}
