//! Slot store: the slab file, its header and slot reads
//!
//! A `Slab<T>` is an append-only array of fixed-size slots. Slots are never
//! moved or renumbered; removing a record only flips its slot to vacant and
//! links it into the free list. Mutations live in `mutator.rs`, free-list
//! bookkeeping in `allocator.rs` and parallel scans in `traversal.rs`.

use super::layout::{Header, SlotLayout, HEADER_SIZE};
use super::slot::{Record, Slot, SlotId};
use crate::config::SlabConfig;
use crate::error::{Error, Result};
use crate::storage::media::{FileMedia, Media};
use crate::storage::wal::{Transactor, WriteAheadLog};
use parking_lot::RwLock;
use std::fmt;
use std::marker::PhantomData;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Slot file inside a slab directory
pub const DATA_FILE: &str = "slots.bin";
/// Redo log inside a slab directory
pub const LOG_FILE: &str = "slots.wal";

/// In-memory copy of the allocator state
#[derive(Debug, Clone, Copy)]
pub(crate) struct SlabState {
    pub(crate) header: Header,
    /// Slots the media currently has room for
    pub(crate) capacity: u64,
    /// Slots on the free list
    pub(crate) vacant: u64,
}

/// Crash-consistent slab of `T` records
pub struct Slab<T: Record> {
    pub(crate) data: Arc<dyn Media>,
    pub(crate) transactor: Arc<dyn Transactor>,
    pub(crate) layout: SlotLayout,
    pub(crate) state: RwLock<SlabState>,
    pub(crate) poisoned: AtomicBool,
    pub(crate) pool: rayon::ThreadPool,
    config: SlabConfig,
    _record: PhantomData<fn() -> T>,
}

impl<T: Record> fmt::Debug for Slab<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read_recursive();
        f.debug_struct("Slab")
            .field("store_id", &state.header.store_id())
            .field("len", &state.header.len)
            .field("vacant", &state.vacant)
            .field("capacity", &state.capacity)
            .finish()
    }
}

impl<T: Record> Slab<T> {
    /// Create a new slab in `dir`, sized for at least `capacity_hint` slots
    pub fn create<P: AsRef<Path>>(dir: P, capacity_hint: u64, config: SlabConfig) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)
            .map_err(|e| Error::Storage(format!("Failed to create slab directory: {}", e)))?;

        let data_path = dir.join(DATA_FILE);
        if data_path.exists() {
            return Err(Error::InvalidArgument(format!(
                "Slab already exists at {}",
                dir.display()
            )));
        }

        let log_path = dir.join(LOG_FILE);
        info!(path = ?dir, capacity_hint, "Creating slab");
        let created = FileMedia::create(&data_path).and_then(|data| {
            let log = FileMedia::create(&log_path)?;
            Self::create_with(Arc::new(data), Arc::new(log), capacity_hint, config)
        });

        // Leave no half-formatted files behind
        if created.is_err() {
            std::fs::remove_file(&data_path).ok();
            std::fs::remove_file(&log_path).ok();
        }
        created
    }

    /// Open the slab in `dir`, finishing any commit a crash interrupted
    pub fn open<P: AsRef<Path>>(dir: P, config: SlabConfig) -> Result<Self> {
        let dir = dir.as_ref();
        let data = Arc::new(FileMedia::open(dir.join(DATA_FILE))?);
        let log = Arc::new(FileMedia::open(dir.join(LOG_FILE))?);
        info!(path = ?dir, "Opening slab");
        Self::open_with(data, log, config)
    }

    /// Format `data` as an empty slab and open it
    pub fn create_with(
        data: Arc<dyn Media>,
        log: Arc<dyn Media>,
        capacity_hint: u64,
        config: SlabConfig,
    ) -> Result<Self> {
        config.validate()?;
        let layout = SlotLayout::of::<T>();
        let header = Header::new(layout, uuid::Uuid::new_v4());
        let capacity = SlotLayout::round_to_segments(capacity_hint, config.segment_slots)?;

        data.set_len(layout.media_len(capacity)?)?;
        data.write_at(0, bytemuck::bytes_of(&header))?;
        data.sync()?;
        log.set_len(0)?;
        log.sync()?;

        Self::open_with(data, log, config)
    }

    /// Open a slab formatted on `data`, using `log` as its redo log
    pub fn open_with(data: Arc<dyn Media>, log: Arc<dyn Media>, config: SlabConfig) -> Result<Self> {
        let transactor = Arc::new(WriteAheadLog::new(data.clone(), log, config.sync_writes));
        Self::open_with_transactor(data, transactor, config)
    }

    /// Open a slab whose commits go through a caller-supplied transactor
    pub fn open_with_transactor(
        data: Arc<dyn Media>,
        transactor: Arc<dyn Transactor>,
        config: SlabConfig,
    ) -> Result<Self> {
        config.validate()?;
        let layout = SlotLayout::of::<T>();

        let replayed = transactor.recover()?;

        if data.len()? < HEADER_SIZE {
            return Err(Error::Corruption("Slab file is shorter than its header".to_string()));
        }
        let mut raw = [0u8; HEADER_SIZE as usize];
        data.read_at(0, &mut raw)?;
        let header: Header = bytemuck::pod_read_unaligned(&raw);
        header.validate(layout)?;

        let capacity = layout.capacity_of(data.len()?);
        if header.len > capacity {
            return Err(Error::Corruption(format!(
                "Header claims {} slots but the media holds {}",
                header.len, capacity
            )));
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.traversal_threads)
            .thread_name(|i| format!("slab-scan-{}", i))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build traversal pool: {}", e)))?;

        let slab = Self {
            data,
            transactor,
            layout,
            state: RwLock::new(SlabState {
                header,
                capacity,
                vacant: 0,
            }),
            poisoned: AtomicBool::new(false),
            pool,
            config,
            _record: PhantomData,
        };

        let vacant = slab.walk_free_list(&header)?.len() as u64;
        slab.state.write().vacant = vacant;

        info!(
            store_id = %header.store_id(),
            len = header.len,
            vacant,
            capacity,
            replayed,
            "Slab ready"
        );
        Ok(slab)
    }

    /// Number of slots handed out, vacant or occupied
    pub fn len(&self) -> u64 {
        self.state.read_recursive().header.len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn occupied_count(&self) -> u64 {
        let state = self.state.read_recursive();
        state.header.len - state.vacant
    }

    pub fn vacant_count(&self) -> u64 {
        self.state.read_recursive().vacant
    }

    pub fn capacity(&self) -> u64 {
        self.state.read_recursive().capacity
    }

    pub fn store_id(&self) -> uuid::Uuid {
        self.state.read_recursive().header.store_id()
    }

    pub fn layout(&self) -> SlotLayout {
        self.layout
    }

    pub fn config(&self) -> &SlabConfig {
        &self.config
    }

    /// Whether a commit failed past its durability point. A poisoned slab
    /// refuses mutations until it is reopened.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Acquire)
    }

    /// Decoded contents of `slot`
    pub fn slot(&self, slot: SlotId) -> Result<Slot<T>> {
        let state = self.state.read_recursive();
        Self::check_bounds(slot, state.header.len)?;
        self.read_slot(slot)
    }

    /// Record stored at `slot`; a vacant slot is `NotOccupied`
    pub fn get(&self, slot: SlotId) -> Result<T> {
        match self.slot(slot)? {
            Slot::Occupied(record) => Ok(record),
            Slot::Vacant { .. } => Err(Error::NotOccupied(slot.index())),
        }
    }

    /// Get statistics about the slab
    pub fn stats(&self) -> SlabStats {
        let state = self.state.read_recursive();
        SlabStats {
            len: state.header.len,
            occupied: state.header.len - state.vacant,
            vacant: state.vacant,
            capacity: state.capacity,
            slot_size: self.layout.slot_size,
        }
    }

    /// Flush the slot file to the media
    pub fn flush(&self) -> Result<()> {
        self.data.sync()
    }

    /// Flush and release the slab
    pub fn close(self) -> Result<()> {
        self.flush()?;
        info!(store_id = %self.store_id(), "Closed slab");
        Ok(())
    }

    pub(crate) fn check_bounds(slot: SlotId, len: u64) -> Result<()> {
        if slot.index() >= len {
            return Err(Error::OutOfRange {
                slot: slot.index(),
                len,
            });
        }
        Ok(())
    }

    /// Read one slot. The caller holds the state lock and has checked bounds.
    pub(crate) fn read_slot(&self, slot: SlotId) -> Result<Slot<T>> {
        let mut buf = vec![0u8; self.layout.slot_size as usize];
        self.data.read_at(self.layout.slot_offset(slot), &mut buf)?;
        Slot::decode(slot, &buf)
    }

    /// Grow the media in whole segments until it holds `needed` slots
    pub(crate) fn ensure_capacity(&self, state: &mut SlabState, needed: u64) -> Result<()> {
        if needed <= state.capacity {
            return Ok(());
        }
        let segment = self.config.segment_slots;
        let capacity = SlotLayout::round_to_segments(needed, segment)?;
        self.data.set_len(self.layout.media_len(capacity)?)?;
        debug!(from = state.capacity, to = capacity, "Grew slab");
        state.capacity = capacity;
        Ok(())
    }
}

/// Statistics for the slab
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlabStats {
    pub len: u64,
    pub occupied: u64,
    pub vacant: u64,
    pub capacity: u64,
    pub slot_size: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::media::MemoryMedia;
    use bytemuck::{Pod, Zeroable};

    #[repr(C)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
    struct Pair {
        key: u64,
        value: u64,
    }

    impl Record for Pair {
        type Key = u64;
        fn key(&self) -> u64 {
            self.key
        }
    }

    fn small_config() -> SlabConfig {
        SlabConfig {
            traversal_threads: 2,
            default_parallelism: 2,
            segment_slots: 4,
            sync_writes: true,
        }
    }

    #[test]
    fn test_create_rounds_capacity_to_segments() -> Result<()> {
        let data = Arc::new(MemoryMedia::new());
        let log = Arc::new(MemoryMedia::new());
        let slab = Slab::<Pair>::create_with(data.clone(), log, 5, small_config())?;

        assert_eq!(slab.capacity(), 8);
        assert!(slab.is_empty());
        assert_eq!(data.len()?, slab.layout().media_len(8)?);
        Ok(())
    }

    #[test]
    fn test_reads_are_bounds_checked() -> Result<()> {
        let data = Arc::new(MemoryMedia::new());
        let log = Arc::new(MemoryMedia::new());
        let slab = Slab::<Pair>::create_with(data, log, 0, small_config())?;

        let slot = slab.insert(&Pair { key: 1, value: 2 })?;
        assert_eq!(slab.get(slot)?, Pair { key: 1, value: 2 });

        let result = slab.get(SlotId::new(1));
        assert!(matches!(result, Err(Error::OutOfRange { slot: 1, len: 1 })));
        Ok(())
    }

    #[test]
    fn test_open_rejects_other_record_type() -> Result<()> {
        #[repr(C)]
        #[derive(Debug, Clone, Copy, Pod, Zeroable)]
        struct Wider {
            key: u64,
            body: [u64; 4],
        }
        impl Record for Wider {
            type Key = u64;
            fn key(&self) -> u64 {
                self.key
            }
        }

        let data = Arc::new(MemoryMedia::new());
        let log = Arc::new(MemoryMedia::new());
        Slab::<Pair>::create_with(data.clone(), log.clone(), 4, small_config())?;

        let result = Slab::<Wider>::open_with(data, log, small_config());
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
        Ok(())
    }

    #[test]
    fn test_open_rejects_garbage() {
        let data = Arc::new(MemoryMedia::from_bytes(vec![0xAB; 256]));
        let log = Arc::new(MemoryMedia::new());
        let result = Slab::<Pair>::open_with(data, log, small_config());
        assert!(matches!(result, Err(Error::Corruption(_))));
    }

    #[test]
    fn test_file_slab_reopen() -> Result<()> {
        let temp_dir = std::env::temp_dir().join(format!("slab_store_{}", std::process::id()));
        std::fs::remove_dir_all(&temp_dir).ok();

        let store_id;
        {
            let slab = Slab::<Pair>::create(&temp_dir, 16, small_config())?;
            store_id = slab.store_id();
            slab.insert(&Pair { key: 1, value: 10 })?;
            slab.insert(&Pair { key: 2, value: 20 })?;
            slab.close()?;
        }

        // A second create over the same directory is refused
        assert!(Slab::<Pair>::create(&temp_dir, 16, small_config()).is_err());

        {
            let slab = Slab::<Pair>::open(&temp_dir, small_config())?;
            assert_eq!(slab.store_id(), store_id);
            assert_eq!(slab.len(), 2);
            assert_eq!(slab.get(SlotId::new(1))?.value, 20);
        }

        std::fs::remove_dir_all(temp_dir).ok();
        Ok(())
    }

    #[test]
    fn test_failed_create_leaves_directory_reusable() -> Result<()> {
        let temp_dir = std::env::temp_dir().join(format!("slab_store_failed_{}", std::process::id()));
        std::fs::remove_dir_all(&temp_dir).ok();

        let result = Slab::<Pair>::create(&temp_dir, u64::MAX, small_config());
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
        assert!(!temp_dir.join(DATA_FILE).exists());
        assert!(!temp_dir.join(LOG_FILE).exists());

        let zero_segments = SlabConfig {
            segment_slots: 0,
            ..small_config()
        };
        assert!(matches!(
            Slab::<Pair>::create(&temp_dir, 4, zero_segments),
            Err(Error::Config(_))
        ));
        assert!(!temp_dir.join(DATA_FILE).exists());

        let slab = Slab::<Pair>::create(&temp_dir, 4, small_config())?;
        assert_eq!(slab.capacity(), 4);
        drop(slab);

        std::fs::remove_dir_all(temp_dir).ok();
        Ok(())
    }
}
