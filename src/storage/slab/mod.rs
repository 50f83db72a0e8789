//! Slab Allocator
//!
//! Fixed-size records in an append-only array of slots, with vacant slots
//! recycled through an on-media free list and every state change committed
//! through a redo log.
//!
//! # Architecture
//!
//! ```text
//! HybridKv<T>
//!   ├─→ DramIndex      key → SlotId     (volatile, rebuilt by traversal)
//!   └─→ Slab<T>
//!        ├─→ Header    magic, free_head, len, store_id
//!        ├─→ Slots     [Occupied][Vacant→4][Occupied][Occupied][Vacant→∅] ...
//!        ├─→ Transactor (WriteAheadLog over slots.wal)
//!        └─→ Traversal pool (rayon)
//! ```
//!
//! Slot states only move `Vacant ⇄ Occupied`. A slot index is stable for as
//! long as the record stays in it, so the index can hold bare `SlotId`s.

pub mod allocator;
pub mod index;
pub mod kv;
pub mod layout;
pub mod mutator;
pub mod production_tests;
pub mod slot;
pub mod store;
pub mod traversal;

pub use index::DramIndex;
pub use kv::{HybridKv, KvStats};
pub use layout::{Header, SlotLayout};
pub use slot::{Record, Slot, SlotId};
pub use store::{Slab, SlabStats, DATA_FILE, LOG_FILE};
pub use traversal::partition;
