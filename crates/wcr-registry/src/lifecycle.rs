//! Volume lifecycle for the registry.
//!
//! The [`LifecycleManager`] owns the engine for one volume. Opening it checks
//! the store schema and reconciles the registry against the volume before the
//! manager is returned, so no caller can observe a half-reconciled registry.
//!
//! Container creation must follow the order
//!
//! ```text
//! register_container_creation(id)   record durable
//! build the container structure     directory layer
//! ...
//! remove the container structure    directory layer
//! deregister_container(id)          record removed
//! ```
//!
//! so that a crash at any point leaves a state reconciliation can repair.

use crate::config::RegistryConfig;
use crate::directory::ContainerDirectory;
use crate::error::{RegistryError, Result};
use crate::reconcile::{ReconcileReport, Reconciler};
use crate::registry::{RegistryIter, WitnessedRegistry};
use parking_lot::{Mutex, MutexGuard};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use wcr_core::{ContainerCreateInfo, ContainerId};
use wcr_kv::{KvEngine, RedbEngine};

/// Engine table holding store-level metadata.
pub const META_TABLE: &str = "store_meta";

/// Schema version this build reads and writes.
pub const STORE_SCHEMA_VERSION: u32 = 1;

const SCHEMA_VERSION_KEY: &[u8] = b"schema_version";

/// Per-container exclusion, striped by id.
struct ContainerLocks {
    stripes: Vec<Mutex<()>>,
}

impl ContainerLocks {
    fn new(stripes: usize) -> Self {
        ContainerLocks {
            stripes: (0..stripes.max(1)).map(|_| Mutex::new(())).collect(),
        }
    }

    fn lock(&self, id: ContainerId) -> MutexGuard<'_, ()> {
        let stripe = (id.get() % self.stripes.len() as u64) as usize;
        self.stripes[stripe].lock()
    }
}

/// Closes the engine when dropped, unless disarmed.
struct EngineGuard<E: KvEngine> {
    engine: Arc<E>,
    armed: bool,
}

impl<E: KvEngine> EngineGuard<E> {
    fn new(engine: Arc<E>) -> Self {
        EngineGuard {
            engine,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl<E: KvEngine> Drop for EngineGuard<E> {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = self.engine.close() {
                warn!(error = %e, "failed to release engine after aborted open");
            }
        }
    }
}

/// Read the store's schema version, stamping a fresh store.
fn check_schema<E: KvEngine>(engine: &E, create_if_missing: bool) -> Result<()> {
    match engine.get(META_TABLE, SCHEMA_VERSION_KEY)? {
        None if create_if_missing => {
            engine.put(
                META_TABLE,
                SCHEMA_VERSION_KEY,
                &STORE_SCHEMA_VERSION.to_be_bytes(),
            )?;
            info!(version = STORE_SCHEMA_VERSION, "initialized store schema");
            Ok(())
        }
        None => Err(RegistryError::StoreUnavailable(
            "store has no schema version".to_string(),
        )),
        Some(bytes) => {
            let raw: [u8; 4] = bytes.as_slice().try_into().map_err(|_| {
                RegistryError::StoreUnavailable(format!(
                    "malformed schema version ({} bytes)",
                    bytes.len()
                ))
            })?;
            match u32::from_be_bytes(raw) {
                STORE_SCHEMA_VERSION => Ok(()),
                other => Err(RegistryError::StoreUnavailable(format!(
                    "unrecognized schema version {}",
                    other
                ))),
            }
        }
    }
}

/// Owner of a volume's registry from mount to unmount.
pub struct LifecycleManager<E: KvEngine, D: ContainerDirectory> {
    registry: WitnessedRegistry<E>,
    directory: Arc<D>,
    locks: ContainerLocks,
    report: ReconcileReport,
    volume: Option<PathBuf>,
    // Set once shutdown has run, so close() followed by Drop releases once.
    closed: AtomicBool,
}

impl<D: ContainerDirectory> LifecycleManager<RedbEngine, D> {
    /// Open or create the registry stored in `volume_path` and reconcile it
    /// against `directory`.
    pub fn open(
        volume_path: impl AsRef<Path>,
        directory: Arc<D>,
        config: RegistryConfig,
    ) -> Result<Self> {
        config.validate()?;
        let volume = volume_path.as_ref();
        if !volume.is_dir() {
            return Err(RegistryError::StoreUnavailable(format!(
                "volume {} is not accessible",
                volume.display()
            )));
        }

        let db_path = volume.join(&config.db_file_name);
        if !config.create_if_missing && !db_path.exists() {
            return Err(RegistryError::StoreUnavailable(format!(
                "no store at {}",
                db_path.display()
            )));
        }

        let engine = RedbEngine::open(&db_path)
            .map_err(|e| RegistryError::StoreUnavailable(e.to_string()))?;
        info!(volume = %volume.display(), "opened container registry");

        let mut manager = Self::open_with_engine(Arc::new(engine), directory, config)?;
        manager.volume = Some(volume.to_path_buf());
        Ok(manager)
    }
}

impl<E: KvEngine, D: ContainerDirectory> LifecycleManager<E, D> {
    /// Take ownership of an opened engine, check its schema and reconcile.
    ///
    /// On failure the engine is closed before the error is returned.
    pub fn open_with_engine(
        engine: Arc<E>,
        directory: Arc<D>,
        config: RegistryConfig,
    ) -> Result<Self> {
        let guard = EngineGuard::new(engine);
        config.validate()?;
        check_schema(guard.engine.as_ref(), config.create_if_missing)?;

        let registry =
            WitnessedRegistry::with_scan_batch_size(Arc::clone(&guard.engine), config.scan_batch_size);
        let report = Reconciler::new(&registry, directory.as_ref())
            .with_config(&config)
            .run()?;

        guard.disarm();
        Ok(LifecycleManager {
            registry,
            directory,
            locks: ContainerLocks::new(config.lock_stripes),
            report,
            volume: None,
            closed: AtomicBool::new(false),
        })
    }

    /// Record that creation of `id` is starting.
    ///
    /// The container structure must not be built until this returns `Ok`.
    pub fn register_container_creation(
        &self,
        id: ContainerId,
        info: ContainerCreateInfo,
    ) -> Result<()> {
        let _lock = self.locks.lock(id);

        if self.registry.contains(id)? {
            return Err(RegistryError::AlreadyRegistered(id));
        }
        self.registry.put(id, &info)?;
        debug!(container = %id, state = %info.state, "registered container creation");
        Ok(())
    }

    /// Replace the record of an already registered container.
    pub fn update_container_info(&self, id: ContainerId, info: ContainerCreateInfo) -> Result<()> {
        let _lock = self.locks.lock(id);

        if !self.registry.contains(id)? {
            return Err(RegistryError::NotRegistered(id));
        }
        self.registry.put(id, &info)?;
        debug!(container = %id, state = %info.state, "updated container record");
        Ok(())
    }

    /// Forget a container whose structure has been removed from the volume.
    ///
    /// Deregistering an id with no record succeeds.
    pub fn deregister_container(&self, id: ContainerId) -> Result<()> {
        let _lock = self.locks.lock(id);

        if self.directory.container_exists(id)? {
            return Err(RegistryError::StillMaterialized(id));
        }
        self.registry.delete(id)?;
        debug!(container = %id, "deregistered container");
        Ok(())
    }

    pub fn get(&self, id: ContainerId) -> Result<Option<ContainerCreateInfo>> {
        self.registry.get(id)
    }

    /// Iterate over every record in ascending id order.
    pub fn iter(&self) -> RegistryIter<'_, E> {
        self.registry.iter()
    }

    pub fn container_ids(&self) -> Result<BTreeSet<ContainerId>> {
        self.registry.container_ids()
    }

    pub fn len(&self) -> Result<usize> {
        self.registry.len()
    }

    pub fn is_empty(&self) -> Result<bool> {
        self.registry.is_empty()
    }

    /// Report of the reconciliation that ran when this manager was opened.
    pub fn reconcile_report(&self) -> &ReconcileReport {
        &self.report
    }

    pub fn directory(&self) -> &Arc<D> {
        &self.directory
    }

    /// Volume directory, when opened through [`LifecycleManager::open`].
    pub fn volume(&self) -> Option<&Path> {
        self.volume.as_deref()
    }

    /// Ask the engine to reclaim space.
    pub fn compact(&self) -> Result<bool> {
        let compacted = self.registry.engine().compact()?;
        debug!(compacted, "compaction finished");
        Ok(compacted)
    }

    /// Whether the engine has been released, here or through another handle.
    pub fn is_closed(&self) -> bool {
        self.registry.engine().is_closed()
    }

    /// Flush and release the engine.
    pub fn close(self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let engine = self.registry.engine();
        let flushed = engine.flush();
        let closed = engine.close();
        info!("closed container registry");
        flushed?;
        closed?;
        Ok(())
    }
}

impl<E: KvEngine, D: ContainerDirectory> Drop for LifecycleManager<E, D> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!(error = %e, "failed to close container registry");
        }
    }
}
