//! # wcr-registry
//!
//! The witnessed container registry of a storage volume.
//!
//! A container exists twice on a node: as a record in this registry and as a
//! structure on the volume. The two are written separately, so the registry
//! enforces an order (record first, structure second; structure removed
//! first, record second) and reconciles both sides whenever a volume mounts.
//!
//! This crate provides:
//! - [`WitnessedRegistry`]: typed, durable `ContainerId -> ContainerCreateInfo` table
//! - [`Reconciler`]: the startup repair pass
//! - [`LifecycleManager`]: open/close, registration and deregistration
//! - [`ContainerDirectory`]: the directory layer contract, with filesystem and
//!   in-memory layouts
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use wcr_core::{ContainerCreateInfo, ContainerId, CreationState, ReplicationHint};
//! use wcr_kv::MemoryEngine;
//! use wcr_registry::{LifecycleManager, MemoryDirectory, RegistryConfig};
//!
//! let directory = Arc::new(MemoryDirectory::new());
//! let manager = LifecycleManager::open_with_engine(
//!     Arc::new(MemoryEngine::new()),
//!     Arc::clone(&directory),
//!     RegistryConfig::default(),
//! )
//! .unwrap();
//!
//! let id = ContainerId::new(42);
//! let info = ContainerCreateInfo::pending(ReplicationHint::Ratis { factor: 3 });
//!
//! // Record first, structure second.
//! manager.register_container_creation(id, info).unwrap();
//! directory.materialize(id, &info).unwrap();
//! manager
//!     .update_container_info(id, info.with_state(CreationState::Created))
//!     .unwrap();
//!
//! assert!(manager.get(id).unwrap().is_some());
//! manager.close().unwrap();
//! ```

pub mod config;
pub mod directory;
pub mod error;
pub mod lifecycle;
pub mod reconcile;
pub mod registry;

pub use config::{IntegrityPolicy, RegistryConfig, RegistryConfigBuilder};
pub use directory::{
    ContainerDirectory, DirectoryError, FsContainerDirectory, InspectError, MemoryDirectory,
};
pub use error::{RegistryError, Result};
pub use lifecycle::{LifecycleManager, META_TABLE, STORE_SCHEMA_VERSION};
pub use reconcile::{ReconcileReport, ReconcileState, Reconciler};
pub use registry::{RegistryIter, RegistryOp, WitnessedRegistry, CONTAINER_TABLE};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::directory::ContainerDirectory;
    pub use crate::error::RegistryError;
    pub use crate::lifecycle::LifecycleManager;
    pub use crate::registry::WitnessedRegistry;
    pub use wcr_core::{ContainerCreateInfo, ContainerId, CreationState, ReplicationHint};
    pub use wcr_kv::{KvEngine, MemoryEngine, RedbEngine};
}
