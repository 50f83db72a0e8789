//! Storage layer
//!
//! # Architecture
//!
//! ```text
//! slab::HybridKv ──→ slab::Slab ──→ wal::Transactor ──→ media::Media
//!                                   (WriteAheadLog)     (FileMedia / MemoryMedia)
//! ```
//!
//! `Media` is the byte-addressable device. Everything above it only ever
//! changes persistent bytes through a `Transactor`, which makes a batch of
//! writes all-or-nothing across crashes.

pub mod media;
pub mod slab;
pub mod wal;

pub use media::{FileMedia, Media, MemoryMedia};
pub use slab::{DramIndex, HybridKv, KvStats, Record, Slab, SlabStats, Slot, SlotId};
pub use wal::{Transaction, Transactor, WriteAheadLog};
