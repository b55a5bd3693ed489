//! Crash recovery walkthrough on a real volume.
//!
//! Registers two containers, builds only one of them, "crashes" and remounts.
//! The remount drops the abandoned registration and keeps the finished one.
//!
//! Run with: cargo run --example crash_recovery

use std::sync::Arc;
use wcr_core::{ContainerCreateInfo, ContainerId, CreationState, ReplicationHint};
use wcr_registry::{FsContainerDirectory, LifecycleManager, RegistryConfig};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let volume = tempfile::tempdir()?;
    let directory = Arc::new(FsContainerDirectory::open(volume.path())?);

    println!("=== Crash Recovery Example ===\n");
    println!("Volume: {}\n", volume.path().display());

    let finished = ContainerId::new(7);
    let abandoned = ContainerId::new(42);
    let info = ContainerCreateInfo::pending(ReplicationHint::Ratis { factor: 3 });

    {
        let manager =
            LifecycleManager::open(volume.path(), Arc::clone(&directory), RegistryConfig::default())?;

        manager.register_container_creation(finished, info)?;
        directory.materialize(finished, &info)?;
        manager.update_container_info(finished, info.with_state(CreationState::Created))?;
        println!("Container {} registered and built", finished);

        manager.register_container_creation(abandoned, info)?;
        println!("Container {} registered, node crashes before building it", abandoned);
        // Dropped without close(): the process is gone.
    }

    println!("\n--- Restart ---\n");
    let manager =
        LifecycleManager::open(volume.path(), Arc::clone(&directory), RegistryConfig::default())?;

    let report = manager.reconcile_report();
    let states: Vec<String> = report.states.iter().map(|s| s.to_string()).collect();
    println!("Reconciliation: {}", states.join(" -> "));
    println!("  dropped stale records: {:?}", report.removed_stale);
    println!("  restored records:      {:?}", report.restored);

    println!("\nRegistry after restart:");
    for entry in manager.iter() {
        let (id, info) = entry?;
        println!("  {} {} {}", id, info.state, info.replication);
    }

    assert_eq!(manager.get(abandoned)?, None);
    assert!(manager.get(finished)?.is_some());

    manager.close()?;
    println!("\n=== Example Complete ===");
    Ok(())
}
