//! On-media format
//!
//! ```text
//! offset 0         64            64 + slot_size
//!        ┌─────────┬─────────────┬─────────────┬───
//!        │ Header  │ Slot 0      │ Slot 1      │ ...   (grows in segments)
//!        └─────────┴─────────────┴─────────────┴───
//!
//! Slot:  [u64 tag][payload: record bytes | u64 next_vacant]
//! ```
//!
//! The payload is shared between the two slot states and is sized for the
//! larger of the record and the link, rounded up to 8 bytes.

use super::slot::{Record, SlotId};
use crate::error::{Error, Result};
use bytemuck::{Pod, Zeroable};

pub const MAGIC: [u8; 8] = *b"PHSLAB01";
pub const FORMAT_VERSION: u32 = 1;
pub const HEADER_SIZE: u64 = 64;
pub const TAG_SIZE: u64 = 8;

/// Slab header, stored in the first 64 bytes of the slot file
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct Header {
    pub magic: [u8; 8],
    pub version: u32,
    pub slot_size: u32,
    pub record_size: u32,
    pub reserved: u32,
    /// First vacant slot as a link (0 = free list empty)
    pub free_head: u64,
    /// Number of slots handed out so far, vacant or occupied
    pub len: u64,
    pub store_id: [u8; 16],
    pub padding: [u8; 8],
}

impl Header {
    pub fn new(layout: SlotLayout, store_id: uuid::Uuid) -> Self {
        Self {
            magic: MAGIC,
            version: FORMAT_VERSION,
            slot_size: layout.slot_size as u32,
            record_size: layout.record_size as u32,
            reserved: 0,
            free_head: 0,
            len: 0,
            store_id: *store_id.as_bytes(),
            padding: [0; 8],
        }
    }

    pub fn free_head(&self) -> Option<SlotId> {
        SlotId::decode_link(self.free_head)
    }

    pub fn with_free_head(mut self, head: Option<SlotId>) -> Self {
        self.free_head = SlotId::encode_link(head);
        self
    }

    pub fn store_id(&self) -> uuid::Uuid {
        uuid::Uuid::from_bytes(self.store_id)
    }

    /// Check that this header describes a slab of records laid out as `layout`
    pub fn validate(&self, layout: SlotLayout) -> Result<()> {
        if self.magic != MAGIC {
            return Err(Error::Corruption("Not a slab file (bad magic)".to_string()));
        }
        if self.version != FORMAT_VERSION {
            return Err(Error::Corruption(format!(
                "Unsupported slab format version {}",
                self.version
            )));
        }
        if self.record_size as u64 != layout.record_size || self.slot_size as u64 != layout.slot_size {
            return Err(Error::InvalidArgument(format!(
                "Slab holds {}-byte records in {}-byte slots, caller expects {} in {}",
                self.record_size, self.slot_size, layout.record_size, layout.slot_size
            )));
        }
        if let Some(head) = self.free_head() {
            if head.index() >= self.len {
                return Err(Error::Corruption(format!(
                    "Free list head {} is outside the slab (len {})",
                    head, self.len
                )));
            }
        }
        Ok(())
    }
}

/// Geometry of the slots for one record type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotLayout {
    pub record_size: u64,
    pub slot_size: u64,
}

impl SlotLayout {
    pub fn of<T: Record>() -> Self {
        let record_size = std::mem::size_of::<T>() as u64;
        let payload = record_size.max(8).div_ceil(8) * 8;
        Self {
            record_size,
            slot_size: TAG_SIZE + payload,
        }
    }

    pub fn slot_offset(&self, slot: SlotId) -> u64 {
        HEADER_SIZE + slot.index() * self.slot_size
    }

    pub fn payload_offset(&self, slot: SlotId) -> u64 {
        self.slot_offset(slot) + TAG_SIZE
    }

    /// Media size needed to hold `capacity` slots
    pub fn media_len(&self, capacity: u64) -> Result<u64> {
        capacity
            .checked_mul(self.slot_size)
            .and_then(|slots| slots.checked_add(HEADER_SIZE))
            .ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "{} slots of {} bytes do not fit in a 64-bit media",
                    capacity, self.slot_size
                ))
            })
    }

    /// Smallest whole number of `segment`-slot segments holding `needed` slots
    pub fn round_to_segments(needed: u64, segment: u64) -> Result<u64> {
        needed
            .div_ceil(segment)
            .checked_mul(segment)
            .ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "Capacity of {} slots overflows when rounded to {}-slot segments",
                    needed, segment
                ))
            })
    }

    /// Whole slots that fit in a media of `media_len` bytes
    pub fn capacity_of(&self, media_len: u64) -> u64 {
        media_len.saturating_sub(HEADER_SIZE) / self.slot_size
    }
}
