//! Slot management for slab allocator

use super::layout::TAG_SIZE;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hash;

/// Tag word of a slot on the free list
pub const TAG_VACANT: u64 = 0x5048_534c_0000_0001;
/// Tag word of a slot holding a record
pub const TAG_OCCUPIED: u64 = 0x5048_534c_0000_0002;

/// Stable index of a slot in the slab
///
/// Indices never move or get renumbered, which is what lets the DRAM index
/// cache them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SlotId(u64);

impl SlotId {
    pub fn new(index: u64) -> Self {
        Self(index)
    }

    pub fn index(&self) -> u64 {
        self.0
    }

    /// On-media link encoding: 0 is "none", anything else is index + 1
    pub(crate) fn encode_link(slot: Option<SlotId>) -> u64 {
        slot.map_or(0, |s| s.0 + 1)
    }

    pub(crate) fn decode_link(raw: u64) -> Option<SlotId> {
        raw.checked_sub(1).map(SlotId)
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Slot({})", self.0)
    }
}

/// A fixed-layout value that can live in a slot
///
/// The bytes of the record are stored as-is, so the type must be
/// plain-old-data. The key is what the DRAM index maps to the slot.
pub trait Record: bytemuck::Pod + Send + Sync {
    type Key: Copy + Eq + Hash + fmt::Debug + Send + Sync;

    fn key(&self) -> Self::Key;
}

/// Decoded contents of a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot<T> {
    /// On the free list; `next` is the following vacant slot
    Vacant { next: Option<SlotId> },
    Occupied(T),
}

impl<T: Record> Slot<T> {
    pub fn is_occupied(&self) -> bool {
        matches!(self, Slot::Occupied(_))
    }

    pub fn occupied(&self) -> Option<&T> {
        match self {
            Slot::Occupied(record) => Some(record),
            Slot::Vacant { .. } => None,
        }
    }

    /// Write tag and payload into `buf`, which must be one slot wide
    pub(crate) fn encode(&self, buf: &mut [u8]) {
        buf.fill(0);
        let (tag, payload) = buf.split_at_mut(TAG_SIZE as usize);
        match self {
            Slot::Vacant { next } => {
                tag.copy_from_slice(&TAG_VACANT.to_le_bytes());
                payload[..8].copy_from_slice(&SlotId::encode_link(*next).to_le_bytes());
            }
            Slot::Occupied(record) => {
                tag.copy_from_slice(&TAG_OCCUPIED.to_le_bytes());
                let bytes = bytemuck::bytes_of(record);
                payload[..bytes.len()].copy_from_slice(bytes);
            }
        }
    }

    /// Read a slot back, checking the tag before touching the payload
    pub(crate) fn decode(slot: SlotId, buf: &[u8]) -> Result<Self> {
        let (tag, payload) = buf.split_at(TAG_SIZE as usize);
        match read_u64(tag) {
            TAG_VACANT => Ok(Slot::Vacant {
                next: SlotId::decode_link(read_u64(&payload[..8])),
            }),
            TAG_OCCUPIED => {
                let size = std::mem::size_of::<T>();
                Ok(Slot::Occupied(bytemuck::pod_read_unaligned(&payload[..size])))
            }
            other => Err(Error::Corruption(format!(
                "{} has unknown tag {:#018x}",
                slot, other
            ))),
        }
    }
}

pub(crate) fn read_u64(bytes: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(raw)
}
