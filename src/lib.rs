// PhotonSlab - Crash-consistent slab storage
// A slab allocator over transactional media with a DRAM-cached key index

#![warn(rust_2018_idioms)]

pub mod config;
pub mod storage;

// Re-exports for convenience
pub use config::SlabConfig;
pub use storage::slab::{DramIndex, HybridKv, KvStats, Record, Slab, SlabStats, Slot, SlotId};
pub use storage::{FileMedia, Media, MemoryMedia};

/// PhotonSlab error types
pub mod error {
    use thiserror::Error;

    #[derive(Error, Debug)]
    pub enum Error {
        #[error("Storage error: {0}")]
        Storage(String),

        /// The commit failed before its batch became durable. Nothing was applied.
        #[error("Transaction failed: {0}")]
        Transaction(String),

        /// The commit failed after its batch became durable. The slab must be
        /// reopened so recovery can finish applying it.
        #[error("Store poisoned: {0}")]
        Poisoned(String),

        #[error("Slot {slot} is out of range (len {len})")]
        OutOfRange { slot: u64, len: u64 },

        #[error("Slot {0} is already vacant")]
        AlreadyVacant(u64),

        #[error("Slot {0} is not occupied")]
        NotOccupied(u64),

        #[error("Corruption: {0}")]
        Corruption(String),

        #[error("Invalid argument: {0}")]
        InvalidArgument(String),

        #[error("Configuration error: {0}")]
        Config(String),

        #[error("Serialization error: {0}")]
        SerializationError(String),
    }

    impl Error {
        /// Errors that mean the allocator, the index and the media disagree.
        /// The store should not be trusted until it is reopened and verified.
        pub fn is_fatal(&self) -> bool {
            matches!(
                self,
                Error::OutOfRange { .. } | Error::Corruption(_) | Error::Poisoned(_)
            )
        }
    }

    pub type Result<T> = std::result::Result<T, Error>;
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
