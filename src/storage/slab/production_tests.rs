//! Production integration tests for the slab
//!
//! These tests run real-world scenarios against file-backed stores

#[cfg(test)]
mod integration {
    use crate::config::SlabConfig;
    use crate::error::Result;
    use crate::storage::slab::{HybridKv, Record, Slab, SlotId};
    use bytemuck::{Pod, Zeroable};
    use std::collections::HashSet;
    use std::path::PathBuf;

    #[repr(C)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
    struct Account {
        id: u64,
        balance: u64,
        flags: u32,
        _pad: u32,
    }

    impl Account {
        fn new(id: u64) -> Self {
            Self {
                id,
                balance: id * 100,
                flags: 0,
                _pad: 0,
            }
        }
    }

    impl Record for Account {
        type Key = u64;
        fn key(&self) -> u64 {
            self.id
        }
    }

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("{}_{}", name, std::process::id()));
        std::fs::remove_dir_all(&dir).ok();
        dir
    }

    #[test]
    fn test_production_basic_operations() -> Result<()> {
        let temp_dir = scratch_dir("slab_prod_basic");
        let kv = HybridKv::<Account>::create(&temp_dir, 64, SlabConfig::default())?;

        for id in 0..100 {
            assert!(kv.insert(Account::new(id))?);
        }

        let account = kv.get(&42)?.ok_or_else(|| crate::error::Error::NotOccupied(42))?;
        assert_eq!(account.balance, 4200);

        assert!(kv.remove(&0)?);
        assert!(kv.get(&0)?.is_none());
        assert_eq!(kv.len(), 99);

        let stats = kv.stats();
        assert_eq!(stats.keys, 99);
        assert_eq!(stats.slab.occupied, 99);
        assert_eq!(stats.slab.vacant, 1);

        std::fs::remove_dir_all(temp_dir).ok();
        Ok(())
    }

    #[test]
    fn test_production_persistence() -> Result<()> {
        let temp_dir = scratch_dir("slab_prod_persist");

        // Phase 1: write, free a few slots
        {
            let kv = HybridKv::<Account>::create(&temp_dir, 16, SlabConfig::default())?;
            for id in 0..50 {
                kv.insert(Account::new(id))?;
            }
            for id in [3, 17, 40] {
                kv.remove(&id)?;
            }
            kv.flush()?;
        }

        // Phase 2: reopen, index rebuilt, free list intact
        {
            let kv = HybridKv::<Account>::open(&temp_dir, SlabConfig::default())?;
            assert_eq!(kv.len(), 47);
            assert_eq!(kv.get(&25)?, Some(Account::new(25)));
            assert!(!kv.contains_key(&17));

            // LIFO: 40 was freed last, so it comes back first
            assert_eq!(kv.slab().free_list()?, vec![SlotId::new(40), SlotId::new(17), SlotId::new(3)]);
            kv.insert(Account::new(1000))?;
            assert_eq!(kv.slot_of(&1000), Some(SlotId::new(40)));
            kv.slab().verify()?;
        }

        std::fs::remove_dir_all(temp_dir).ok();
        Ok(())
    }

    #[test]
    fn test_production_churn_keeps_slab_compact() -> Result<()> {
        let temp_dir = scratch_dir("slab_prod_churn");
        let config = SlabConfig {
            segment_slots: 32,
            ..SlabConfig::default()
        };
        let kv = HybridKv::<Account>::create(&temp_dir, 0, config)?;

        for id in 0..200 {
            kv.insert(Account::new(id))?;
        }
        // Replace every other key ten times over
        for round in 1..=10u64 {
            for id in (0..200).step_by(2) {
                let old = if round == 1 { id } else { id + (round - 1) * 1000 };
                assert!(kv.remove(&old)?);
                assert!(kv.insert(Account::new(id + round * 1000))?);
            }
        }

        let stats = kv.slab().verify()?;
        assert_eq!(stats.len, 200);
        assert_eq!(stats.occupied, 200);
        assert_eq!(stats.vacant, 0);
        assert_eq!(kv.len(), 200);

        std::fs::remove_dir_all(temp_dir).ok();
        Ok(())
    }

    #[test]
    fn test_production_parallel_traversal() -> Result<()> {
        let temp_dir = scratch_dir("slab_prod_traverse");
        let slab = Slab::<Account>::create(&temp_dir, 0, SlabConfig::default())?;
        for id in 0..5000 {
            slab.insert(&Account::new(id))?;
        }

        for parallelism in [1, 4, 16] {
            let seen = parking_lot::Mutex::new(HashSet::new());
            slab.foreach(
                |slot, account| {
                    assert_eq!(slot.index(), account.id);
                    seen.lock().insert(account.id);
                },
                parallelism,
            )?;
            assert_eq!(seen.into_inner().len(), 5000);
        }

        slab.close()?;
        std::fs::remove_dir_all(temp_dir).ok();
        Ok(())
    }

    #[test]
    fn test_production_create_refuses_existing_store() -> Result<()> {
        let temp_dir = scratch_dir("slab_prod_exists");
        HybridKv::<Account>::create(&temp_dir, 8, SlabConfig::default())?;

        let again = HybridKv::<Account>::create(&temp_dir, 8, SlabConfig::default());
        assert!(matches!(again, Err(crate::error::Error::InvalidArgument(_))));

        std::fs::remove_dir_all(temp_dir).ok();
        Ok(())
    }
}
