//! Crash-recovery tests for the registry lifecycle.
//!
//! These tests verify:
//! - A crash between registration and materialization leaves no trace after restart
//! - A fully created container survives a crash untouched
//! - Orphaned structures get their record back
//! - A half-built structure of an unfinished creation is quarantined
//! - After reconciliation the registry and the volume hold the same ids
//!
//! A "crash" drops the manager without calling `close()` and opens the same
//! store again.

use std::collections::BTreeSet;
use std::sync::Arc;
use wcr_core::{ContainerCreateInfo, ContainerId, CreationState, ReplicationHint};
use wcr_kv::{KvEngine, MemoryEngine};
use wcr_registry::{
    ContainerDirectory, FsContainerDirectory, LifecycleManager, MemoryDirectory, ReconcileState,
    RegistryConfig, RegistryConfigBuilder, RegistryError,
};

const T0: u64 = 1_700_000_000_000;

fn pending(ts: u64) -> ContainerCreateInfo {
    ContainerCreateInfo::pending(ReplicationHint::Ratis { factor: 3 }).with_created_at(ts)
}

/// A memory-backed node: the engine handle survives "restarts".
struct MemoryNode {
    disk: MemoryEngine,
    directory: Arc<MemoryDirectory>,
}

impl MemoryNode {
    fn new() -> Self {
        MemoryNode {
            disk: MemoryEngine::new(),
            directory: Arc::new(MemoryDirectory::new()),
        }
    }

    fn mount(&self) -> LifecycleManager<MemoryEngine, MemoryDirectory> {
        LifecycleManager::open_with_engine(
            Arc::new(self.disk.reopen()),
            Arc::clone(&self.directory),
            RegistryConfig::default(),
        )
        .unwrap()
    }
}

#[test]
fn crash_before_materialization_leaves_no_trace() {
    let node = MemoryNode::new();
    let id = ContainerId::new(42);

    let manager = node.mount();
    manager.register_container_creation(id, pending(T0)).unwrap();
    assert!(manager.get(id).unwrap().is_some());
    drop(manager); // crash: structure never built

    let manager = node.mount();
    assert_eq!(manager.get(id).unwrap(), None);
    assert_eq!(manager.reconcile_report().removed_stale, vec![id]);
    assert!(!node.directory.container_exists(id).unwrap());
}

#[test]
fn crash_after_materialization_keeps_record_unchanged() {
    let node = MemoryNode::new();
    let id = ContainerId::new(7);
    let info = pending(T0);

    let manager = node.mount();
    manager.register_container_creation(id, info).unwrap();
    node.directory.materialize(id, &info).unwrap();
    drop(manager);

    let manager = node.mount();
    let report = manager.reconcile_report();
    assert!(report.is_clean());
    assert!(!report.states.contains(&ReconcileState::DivergenceDetected));
    assert_eq!(manager.get(id).unwrap(), Some(info));
}

#[test]
fn orphaned_structure_is_registered() {
    let node = MemoryNode::new();
    let id = ContainerId::new(19);
    let info = pending(T0).with_state(CreationState::Created);

    // Written straight to the directory layer: no registry record exists.
    node.directory.materialize(id, &info).unwrap();

    let manager = node.mount();
    assert_eq!(manager.reconcile_report().restored, vec![id]);
    assert_eq!(manager.get(id).unwrap(), Some(info));
}

#[test]
fn corrupt_orphan_is_quarantined_without_record() {
    let node = MemoryNode::new();
    let id = ContainerId::new(20);
    node.directory.insert_corrupt(id, "metadata file truncated");

    let manager = node.mount();
    assert_eq!(manager.get(id).unwrap(), None);
    assert_eq!(
        node.directory.quarantined(),
        vec![(id, "metadata file truncated".to_string())]
    );
}

#[test]
fn registry_matches_volume_after_mixed_divergence() {
    let node = MemoryNode::new();

    let manager = node.mount();
    for raw in 1..=6u64 {
        manager
            .register_container_creation(ContainerId::new(raw), pending(T0 + raw))
            .unwrap();
    }
    // Only the even containers get built before the crash.
    for raw in (2..=6u64).step_by(2) {
        node.directory
            .materialize(ContainerId::new(raw), &pending(T0 + raw))
            .unwrap();
    }
    drop(manager);

    // Structures nobody registered, one of them damaged.
    node.directory
        .materialize(ContainerId::new(100), &pending(T0))
        .unwrap();
    node.directory.insert_corrupt(ContainerId::new(101), "bad header");

    let manager = node.mount();
    let registered = manager.container_ids().unwrap();
    let physical = node.directory.list_container_ids().unwrap();

    assert_eq!(registered, physical);
    let expected: BTreeSet<ContainerId> =
        [2u64, 4, 6, 100].into_iter().map(ContainerId::new).collect();
    assert_eq!(registered, expected);

    let report = manager.reconcile_report();
    assert_eq!(report.removed_stale.len(), 3);
    assert_eq!(report.restored, vec![ContainerId::new(100)]);
    assert_eq!(report.quarantined.len(), 1);
}

#[test]
fn full_lifecycle_leaves_nothing_behind() {
    let node = MemoryNode::new();
    let id = ContainerId::new(3);
    let info = pending(T0);

    let manager = node.mount();
    manager.register_container_creation(id, info).unwrap();
    node.directory.materialize(id, &info).unwrap();
    manager
        .update_container_info(id, info.with_state(CreationState::Created))
        .unwrap();

    node.directory.remove(id).unwrap();
    manager.deregister_container(id).unwrap();
    manager.close().unwrap();

    let manager = node.mount();
    assert!(manager.reconcile_report().is_clean());
    assert!(manager.is_empty().unwrap());
}

#[test]
fn crash_between_removal_and_deregistration_is_repaired() {
    let node = MemoryNode::new();
    let id = ContainerId::new(8);
    let info = pending(T0);

    let manager = node.mount();
    manager.register_container_creation(id, info).unwrap();
    node.directory.materialize(id, &info).unwrap();
    node.directory.remove(id).unwrap();
    drop(manager); // crash before deregister_container

    let manager = node.mount();
    assert_eq!(manager.get(id).unwrap(), None);
}

#[test]
fn failed_reconciliation_fails_the_mount() {
    let node = MemoryNode::new();
    node.mount()
        .register_container_creation(ContainerId::new(1), pending(T0))
        .unwrap();

    node.directory.set_fail_listing(true);
    let handle = Arc::new(node.disk.reopen());
    let result = LifecycleManager::open_with_engine(
        Arc::clone(&handle),
        Arc::clone(&node.directory),
        RegistryConfig::default(),
    );

    assert!(matches!(result, Err(RegistryError::Directory(_))));
    assert!(handle.is_closed());

    // The record is still there for the next attempt.
    node.directory.set_fail_listing(false);
    let manager = node.mount();
    assert_eq!(
        manager.reconcile_report().removed_stale,
        vec![ContainerId::new(1)]
    );
}

#[test]
fn redb_volume_survives_restart() {
    let volume = tempfile::tempdir().unwrap();
    let directory = Arc::new(FsContainerDirectory::open(volume.path()).unwrap());
    let config = RegistryConfigBuilder::new().scan_batch_size(2).build();

    let built = ContainerId::new(7);
    let abandoned = ContainerId::new(42);
    let info = pending(T0);

    let manager =
        LifecycleManager::open(volume.path(), Arc::clone(&directory), config.clone()).unwrap();
    manager.register_container_creation(built, info).unwrap();
    directory.materialize(built, &info).unwrap();
    manager.register_container_creation(abandoned, info).unwrap();
    drop(manager);

    let orphan = ContainerId::new(500);
    directory.materialize(orphan, &info).unwrap();

    let manager =
        LifecycleManager::open(volume.path(), Arc::clone(&directory), config).unwrap();
    assert_eq!(manager.volume(), Some(volume.path()));
    assert_eq!(manager.get(built).unwrap(), Some(info));
    assert_eq!(manager.get(abandoned).unwrap(), None);
    assert_eq!(manager.get(orphan).unwrap(), Some(info));
    assert_eq!(
        manager.container_ids().unwrap(),
        directory.list_container_ids().unwrap()
    );
    manager.compact().unwrap();
    manager.close().unwrap();
}

#[test]
fn redb_open_rejects_missing_volume() {
    let volume = tempfile::tempdir().unwrap();
    let missing = volume.path().join("not-mounted");
    let directory = Arc::new(MemoryDirectory::new());

    let result = LifecycleManager::open(&missing, directory, RegistryConfig::default());
    assert!(matches!(result, Err(RegistryError::StoreUnavailable(_))));
}

#[test]
fn redb_open_without_create_requires_existing_store() {
    let volume = tempfile::tempdir().unwrap();
    let directory = Arc::new(MemoryDirectory::new());
    let config = RegistryConfigBuilder::new().create_if_missing(false).build();

    let result = LifecycleManager::open(volume.path(), directory, config);
    assert!(matches!(result, Err(RegistryError::StoreUnavailable(_))));
}

#[test]
fn partial_structure_of_unfinished_creation_is_quarantined() {
    let volume = tempfile::tempdir().unwrap();
    let id = ContainerId::new(42);
    let info = pending(T0);

    {
        let directory = Arc::new(FsContainerDirectory::open(volume.path()).unwrap());
        let manager =
            LifecycleManager::open(volume.path(), directory, RegistryConfig::default()).unwrap();
        manager.register_container_creation(id, info).unwrap();
    }
    // The crash left a structure with metadata but no descriptor or chunks.
    std::fs::create_dir_all(volume.path().join("containers/42/metadata")).unwrap();

    let directory = Arc::new(FsContainerDirectory::open(volume.path()).unwrap());
    let manager =
        LifecycleManager::open(volume.path(), Arc::clone(&directory), RegistryConfig::default())
            .unwrap();

    assert_eq!(manager.get(id).unwrap(), None);
    assert!(directory.list_container_ids().unwrap().is_empty());
    assert_eq!(directory.quarantined_ids().unwrap(), BTreeSet::from([id]));
    let report = manager.reconcile_report();
    assert_eq!(report.removed_incomplete, vec![id]);
    assert!(report.states.contains(&ReconcileState::DivergenceDetected));

    // The id can be created again from scratch.
    manager.register_container_creation(id, info).unwrap();
    directory.materialize(id, &info).unwrap();
    manager
        .update_container_info(id, info.with_state(CreationState::Created))
        .unwrap();
    assert_eq!(directory.inspect_container(id).unwrap(), info);
    manager.close().unwrap();
}

#[test]
fn interrupted_staged_build_leaves_no_trace() {
    let volume = tempfile::tempdir().unwrap();
    let id = ContainerId::new(42);

    {
        let directory = Arc::new(FsContainerDirectory::open(volume.path()).unwrap());
        let manager =
            LifecycleManager::open(volume.path(), directory, RegistryConfig::default()).unwrap();
        manager.register_container_creation(id, pending(T0)).unwrap();
    }
    std::fs::create_dir_all(volume.path().join("tmp/staging/42/metadata")).unwrap();

    let directory = Arc::new(FsContainerDirectory::open(volume.path()).unwrap());
    let manager =
        LifecycleManager::open(volume.path(), Arc::clone(&directory), RegistryConfig::default())
            .unwrap();

    assert_eq!(manager.get(id).unwrap(), None);
    assert_eq!(manager.reconcile_report().removed_stale, vec![id]);
    assert!(directory.list_container_ids().unwrap().is_empty());
    assert!(directory.quarantined_ids().unwrap().is_empty());
    assert!(!volume.path().join("tmp/staging/42").exists());
}

#[test]
fn non_canonical_container_directory_does_not_fail_mount() {
    let volume = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(volume.path().join("containers/007/chunks")).unwrap();
    std::fs::create_dir_all(volume.path().join("containers/+7/chunks")).unwrap();

    let directory = Arc::new(FsContainerDirectory::open(volume.path()).unwrap());
    let manager =
        LifecycleManager::open(volume.path(), Arc::clone(&directory), RegistryConfig::default())
            .unwrap();

    assert!(manager.reconcile_report().is_clean());
    assert!(manager.container_ids().unwrap().is_empty());
    assert!(volume.path().join("containers/007").is_dir());
    manager.close().unwrap();
}
