//! Concurrent access to the registry.
//!
//! These tests verify:
//! - Iteration racing a write yields every untouched entry exactly once
//! - Concurrent registrations of distinct ids all land
//! - Concurrent registrations of the same id admit exactly one winner

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use wcr_core::{ContainerCreateInfo, ContainerId, ReplicationHint};
use wcr_kv::{MemoryEngine, RedbEngine};
use wcr_registry::{
    LifecycleManager, MemoryDirectory, RegistryConfig, RegistryError, WitnessedRegistry,
};

fn info(ts: u64) -> ContainerCreateInfo {
    ContainerCreateInfo::pending(ReplicationHint::ErasureCoded { data: 6, parity: 3 })
        .with_created_at(ts)
}

/// Collect one full iteration, failing on duplicates.
fn snapshot<E: wcr_kv::KvEngine>(
    registry: &WitnessedRegistry<E>,
) -> BTreeMap<ContainerId, ContainerCreateInfo> {
    let mut seen = BTreeMap::new();
    for entry in registry.iter() {
        let (id, info) = entry.unwrap();
        assert!(seen.insert(id, info).is_none(), "{} yielded twice", id);
    }
    seen
}

#[test]
fn iteration_racing_put_sees_all_existing_entries() {
    let engine = Arc::new(MemoryEngine::new());
    // Small pages so the writer lands between scans.
    let registry = WitnessedRegistry::with_scan_batch_size(engine, 2);
    let existing: Vec<u64> = vec![1, 2, 3, 5, 8, 13, 21, 34];
    for raw in &existing {
        registry.put(ContainerId::new(*raw), &info(*raw)).unwrap();
    }

    for _ in 0..50 {
        registry.delete(ContainerId::new(9)).unwrap();
        let seen = thread::scope(|s| {
            let reader = s.spawn(|| snapshot(&registry));
            s.spawn(|| registry.put(ContainerId::new(9), &info(9)).unwrap());
            reader.join().unwrap()
        });

        for raw in &existing {
            assert_eq!(seen.get(&ContainerId::new(*raw)), Some(&info(*raw)));
        }
        let extra: Vec<_> = seen
            .keys()
            .filter(|id| !existing.contains(&id.get()))
            .collect();
        assert!(extra.is_empty() || extra == vec![&ContainerId::new(9)]);
    }
}

#[test]
fn iteration_racing_put_on_redb() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = Arc::new(RedbEngine::open(tmp.path().join("container.db")).unwrap());
    let registry = WitnessedRegistry::with_scan_batch_size(engine, 3);
    for raw in 0..20u64 {
        if raw != 9 {
            registry.put(ContainerId::new(raw), &info(raw)).unwrap();
        }
    }

    let seen = thread::scope(|s| {
        let reader = s.spawn(|| snapshot(&registry));
        s.spawn(|| registry.put(ContainerId::new(9), &info(9)).unwrap());
        reader.join().unwrap()
    });

    let expected = if seen.contains_key(&ContainerId::new(9)) { 20 } else { 19 };
    assert_eq!(seen.len(), expected);
}

#[test]
fn concurrent_registration_of_distinct_ids() {
    let directory = Arc::new(MemoryDirectory::new());
    let manager = LifecycleManager::open_with_engine(
        Arc::new(MemoryEngine::new()),
        Arc::clone(&directory),
        RegistryConfig::default(),
    )
    .unwrap();

    thread::scope(|s| {
        for worker in 0..8u64 {
            let manager = &manager;
            s.spawn(move || {
                for n in 0..25u64 {
                    let id = ContainerId::new(worker * 1000 + n);
                    manager.register_container_creation(id, info(n)).unwrap();
                }
            });
        }
    });

    assert_eq!(manager.len().unwrap(), 200);
}

#[test]
fn concurrent_registration_of_same_id_has_one_winner() {
    let manager = LifecycleManager::open_with_engine(
        Arc::new(MemoryEngine::new()),
        Arc::new(MemoryDirectory::new()),
        RegistryConfig::default(),
    )
    .unwrap();
    let id = ContainerId::new(77);
    let winners = AtomicUsize::new(0);
    let losers = AtomicUsize::new(0);

    thread::scope(|s| {
        for worker in 0..8u64 {
            let (manager, winners, losers) = (&manager, &winners, &losers);
            s.spawn(move || match manager.register_container_creation(id, info(worker)) {
                Ok(()) => {
                    winners.fetch_add(1, Ordering::SeqCst);
                }
                Err(RegistryError::AlreadyRegistered(_)) => {
                    losers.fetch_add(1, Ordering::SeqCst);
                }
                Err(e) => panic!("unexpected error: {}", e),
            });
        }
    });

    assert_eq!(winners.load(Ordering::SeqCst), 1);
    assert_eq!(losers.load(Ordering::SeqCst), 7);
}
