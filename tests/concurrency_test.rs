//! Many threads sharing one store

use bytemuck::{Pod, Zeroable};
use photonslab::{HybridKv, Record, SlabConfig, SlotId};
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
struct Counter {
    key: u64,
    owner: u64,
}

impl Record for Counter {
    type Key = u64;

    fn key(&self) -> u64 {
        self.key
    }
}

const THREADS: u64 = 8;
const PER_THREAD: u64 = 200;

#[test]
fn test_concurrent_inserts_and_reads() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let kv = Arc::new(
        HybridKv::<Counter>::create(dir.path(), 0, SlabConfig::default()).expect("create"),
    );

    let handles: Vec<_> = (0..THREADS)
        .map(|owner| {
            let kv = Arc::clone(&kv);
            thread::spawn(move || {
                for i in 0..PER_THREAD {
                    let key = owner * PER_THREAD + i;
                    assert!(kv.insert(Counter { key, owner }).expect("insert"));
                    assert_eq!(kv.get(&key).expect("get"), Some(Counter { key, owner }));
                    // Peek at a neighbour's key, which may or may not exist yet
                    let other = (key + PER_THREAD) % (THREADS * PER_THREAD);
                    if let Some(found) = kv.get(&other).expect("get other") {
                        assert_eq!(found.key, other);
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("worker panicked");
    }

    assert_eq!(kv.len() as u64, THREADS * PER_THREAD);
    let stats = kv.slab().verify().expect("verify");
    assert_eq!(stats.occupied, THREADS * PER_THREAD);
    assert_eq!(stats.vacant, 0);

    let slots: HashSet<SlotId> = kv.index_snapshot().values().copied().collect();
    assert_eq!(slots.len() as u64, THREADS * PER_THREAD);
}

#[test]
fn test_concurrent_churn_with_traversal() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let kv = Arc::new(
        HybridKv::<Counter>::create(dir.path(), 0, SlabConfig::default()).expect("create"),
    );
    for key in 0..THREADS * PER_THREAD {
        kv.insert(Counter { key, owner: 0 }).expect("seed");
    }

    let writers: Vec<_> = (0..THREADS)
        .map(|owner| {
            let kv = Arc::clone(&kv);
            thread::spawn(move || {
                for i in 0..PER_THREAD {
                    let key = owner * PER_THREAD + i;
                    assert!(kv.remove(&key).expect("remove"));
                    assert!(kv.insert(Counter { key, owner: owner + 1 }).expect("reinsert"));
                }
            })
        })
        .collect();

    // Each traversal sees a consistent snapshot while the writers wait
    for _ in 0..5 {
        let seen = parking_lot::Mutex::new(0u64);
        kv.foreach(|_, _| *seen.lock() += 1, 4).expect("foreach");
        let seen = seen.into_inner();
        // Writers caught between their remove and reinsert are missing
        assert!(seen <= THREADS * PER_THREAD && seen >= THREADS * PER_THREAD - THREADS);
    }

    for writer in writers {
        writer.join().expect("writer panicked");
    }

    assert_eq!(kv.len() as u64, THREADS * PER_THREAD);
    assert_eq!(kv.stats().slab.len, THREADS * PER_THREAD);
    kv.slab().verify().expect("verify");
}

#[test]
fn test_lookup_inside_traversal_while_insert_waits() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let kv = Arc::new(
        HybridKv::<Counter>::create(dir.path(), 0, SlabConfig::default()).expect("create"),
    );
    for key in 0..4 {
        kv.insert(Counter { key, owner: 0 }).expect("seed");
    }

    let (done_tx, done_rx) = std::sync::mpsc::channel();
    let scanner = {
        let kv = Arc::clone(&kv);
        thread::spawn(move || {
            kv.foreach(
                |_, record| {
                    // Give the writer time to queue up behind the scan
                    thread::sleep(std::time::Duration::from_millis(100));
                    let found = kv.get(&record.key).expect("get inside foreach");
                    assert_eq!(found, Some(*record));
                },
                1,
            )
            .expect("foreach");
            done_tx.send(()).expect("report");
        })
    };

    thread::sleep(std::time::Duration::from_millis(30));
    let writer = {
        let kv = Arc::clone(&kv);
        thread::spawn(move || kv.insert(Counter { key: 99, owner: 1 }).expect("insert"))
    };

    done_rx
        .recv_timeout(std::time::Duration::from_secs(10))
        .expect("traversal finished while an insert was waiting");
    scanner.join().expect("scanner panicked");
    assert!(writer.join().expect("writer panicked"));
    assert_eq!(kv.get(&99).expect("get"), Some(Counter { key: 99, owner: 1 }));
}
