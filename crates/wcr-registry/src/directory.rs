//! The physical container directory layer.
//!
//! Reconciliation only needs to enumerate, inspect and quarantine container
//! structures; that contract is [`ContainerDirectory`]. Two layouts ship with
//! the crate: [`MemoryDirectory`] for tests and simulations, and
//! [`FsContainerDirectory`]:
//!
//! ```text
//! <root>/containers/<id>/metadata/<id>.container   JSON descriptor
//! <root>/containers/<id>/chunks/                   container data
//! <root>/tmp/staging/<id>/                         structures being built
//! <root>/tmp/deleted-containers/<id>/              quarantined structures
//! ```
//!
//! A structure is assembled under `tmp/staging` and renamed into
//! `containers/` as the last step, so `containers/` only ever holds complete
//! structures. Only directories whose name is the canonical decimal form of
//! an id are listed as containers.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::{debug, warn};
use wcr_core::{ContainerCreateInfo, ContainerId};

const CONTAINERS_DIR: &str = "containers";
const METADATA_DIR: &str = "metadata";
const CHUNKS_DIR: &str = "chunks";
const QUARANTINE_DIR: &str = "tmp/deleted-containers";
const STAGING_DIR: &str = "tmp/staging";
const DESCRIPTOR_EXT: &str = "container";
const QUARANTINE_REASON_FILE: &str = "quarantine.reason";

/// Errors from the directory layer itself.
#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Container {0} not found")]
    NotFound(ContainerId),

    #[error("Container {0} already exists")]
    AlreadyExists(ContainerId),

    #[error("Descriptor error: {0}")]
    Descriptor(String),
}

impl DirectoryError {
    fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        DirectoryError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result of inspecting a single container structure.
#[derive(Error, Debug)]
pub enum InspectError {
    /// The structure exists but cannot be trusted.
    #[error("Container {id} failed integrity check: {reason}")]
    Integrity { id: ContainerId, reason: String },

    #[error(transparent)]
    Directory(#[from] DirectoryError),
}

/// Trait for the on-volume container directory layer.
pub trait ContainerDirectory: Send + Sync {
    /// Ids of every container structure present on the volume.
    fn list_container_ids(&self) -> Result<BTreeSet<ContainerId>, DirectoryError>;

    /// Whether a structure for `id` is present.
    fn container_exists(&self, id: ContainerId) -> Result<bool, DirectoryError>;

    /// Validate the structure for `id` and derive its create info from it.
    fn inspect_container(&self, id: ContainerId) -> Result<ContainerCreateInfo, InspectError>;

    /// Move an untrusted structure out of the live set so it can be deleted
    /// later. After this returns, `id` is no longer listed.
    fn quarantine(&self, id: ContainerId, reason: &str) -> Result<(), DirectoryError>;
}

/// On-disk descriptor written next to every container's data.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct ContainerDescriptor {
    container_id: ContainerId,
    info: ContainerCreateInfo,
}

/// Filesystem-backed container directory layout.
#[derive(Clone, Debug)]
pub struct FsContainerDirectory {
    root: PathBuf,
}

impl FsContainerDirectory {
    /// Open the layout rooted at `root`, creating the containers directory if
    /// needed. Structures left half-built in staging by a crash are discarded.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, DirectoryError> {
        let root = root.as_ref().to_path_buf();
        let containers = root.join(CONTAINERS_DIR);
        fs::create_dir_all(&containers).map_err(|e| DirectoryError::io(&containers, e))?;

        let staging = root.join(STAGING_DIR);
        if staging.is_dir() {
            fs::remove_dir_all(&staging).map_err(|e| DirectoryError::io(&staging, e))?;
            debug!(path = %staging.display(), "discarded incomplete container builds");
        }
        Ok(FsContainerDirectory { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn container_dir(&self, id: ContainerId) -> PathBuf {
        self.root.join(CONTAINERS_DIR).join(id.get().to_string())
    }

    fn staging_dir(&self, id: ContainerId) -> PathBuf {
        self.root.join(STAGING_DIR).join(id.get().to_string())
    }

    fn descriptor_path(&self, id: ContainerId) -> PathBuf {
        descriptor_in(&self.container_dir(id), id)
    }

    fn quarantine_dir(&self) -> PathBuf {
        self.root.join(QUARANTINE_DIR)
    }

    /// Build the physical structure for a registered container.
    ///
    /// The structure appears under `containers/` only once it is complete.
    pub fn materialize(
        &self,
        id: ContainerId,
        info: &ContainerCreateInfo,
    ) -> Result<(), DirectoryError> {
        let dir = self.container_dir(id);
        if dir.exists() {
            return Err(DirectoryError::AlreadyExists(id));
        }

        let staging = self.staging_dir(id);
        if staging.exists() {
            fs::remove_dir_all(&staging).map_err(|e| DirectoryError::io(&staging, e))?;
        }
        for sub in [METADATA_DIR, CHUNKS_DIR] {
            let path = staging.join(sub);
            fs::create_dir_all(&path).map_err(|e| DirectoryError::io(&path, e))?;
        }

        let descriptor = ContainerDescriptor {
            container_id: id,
            info: *info,
        };
        let bytes = serde_json::to_vec_pretty(&descriptor)
            .map_err(|e| DirectoryError::Descriptor(e.to_string()))?;
        let path = descriptor_in(&staging, id);
        fs::write(&path, bytes).map_err(|e| DirectoryError::io(&path, e))?;

        fs::rename(&staging, &dir).map_err(|e| DirectoryError::io(&dir, e))?;

        debug!(container = %id, "materialized container");
        Ok(())
    }

    /// Remove the physical structure. Removing an absent container succeeds.
    pub fn remove(&self, id: ContainerId) -> Result<(), DirectoryError> {
        let dir = self.container_dir(id);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                debug!(container = %id, "removed container");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DirectoryError::io(dir, e)),
        }
    }

    /// Ids currently sitting in quarantine.
    pub fn quarantined_ids(&self) -> Result<BTreeSet<ContainerId>, DirectoryError> {
        let dir = self.quarantine_dir();
        if !dir.is_dir() {
            return Ok(BTreeSet::new());
        }
        list_numeric_dirs(&dir)
    }

    fn integrity(id: ContainerId, reason: impl Into<String>) -> InspectError {
        InspectError::Integrity {
            id,
            reason: reason.into(),
        }
    }
}

fn descriptor_in(container_dir: &Path, id: ContainerId) -> PathBuf {
    container_dir
        .join(METADATA_DIR)
        .join(format!("{}.{}", id.get(), DESCRIPTOR_EXT))
}

/// Parse a directory name as an id, accepting only its canonical form.
fn parse_container_dir(name: &str) -> Option<ContainerId> {
    let raw = name.parse::<u64>().ok()?;
    (raw.to_string() == name).then_some(ContainerId::new(raw))
}

fn list_numeric_dirs(dir: &Path) -> Result<BTreeSet<ContainerId>, DirectoryError> {
    let mut ids = BTreeSet::new();
    let entries = fs::read_dir(dir).map_err(|e| DirectoryError::io(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| DirectoryError::io(dir, e))?;
        let file_type = entry.file_type().map_err(|e| DirectoryError::io(entry.path(), e))?;
        if !file_type.is_dir() {
            continue;
        }
        match entry.file_name().to_str().and_then(parse_container_dir) {
            Some(id) => {
                ids.insert(id);
            }
            None => warn!(path = %entry.path().display(), "ignoring non-container directory"),
        }
    }
    Ok(ids)
}

impl ContainerDirectory for FsContainerDirectory {
    fn list_container_ids(&self) -> Result<BTreeSet<ContainerId>, DirectoryError> {
        list_numeric_dirs(&self.root.join(CONTAINERS_DIR))
    }

    fn container_exists(&self, id: ContainerId) -> Result<bool, DirectoryError> {
        Ok(self.container_dir(id).is_dir())
    }

    fn inspect_container(&self, id: ContainerId) -> Result<ContainerCreateInfo, InspectError> {
        let dir = self.container_dir(id);
        if !dir.is_dir() {
            return Err(DirectoryError::NotFound(id).into());
        }

        let path = self.descriptor_path(id);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Self::integrity(id, "missing container descriptor"));
            }
            Err(e) => return Err(DirectoryError::io(path, e).into()),
        };

        let descriptor: ContainerDescriptor = serde_json::from_slice(&bytes)
            .map_err(|e| Self::integrity(id, format!("unreadable descriptor: {}", e)))?;

        if descriptor.container_id != id {
            return Err(Self::integrity(
                id,
                format!("descriptor names container {}", descriptor.container_id),
            ));
        }
        if !dir.join(CHUNKS_DIR).is_dir() {
            return Err(Self::integrity(id, "missing chunks directory"));
        }

        Ok(descriptor.info)
    }

    fn quarantine(&self, id: ContainerId, reason: &str) -> Result<(), DirectoryError> {
        let source = self.container_dir(id);
        if !source.is_dir() {
            return Err(DirectoryError::NotFound(id));
        }

        let quarantine = self.quarantine_dir();
        fs::create_dir_all(&quarantine).map_err(|e| DirectoryError::io(&quarantine, e))?;

        let target = quarantine.join(id.get().to_string());
        if target.exists() {
            fs::remove_dir_all(&target).map_err(|e| DirectoryError::io(&target, e))?;
        }
        fs::rename(&source, &target).map_err(|e| DirectoryError::io(&source, e))?;

        let reason_path = target.join(QUARANTINE_REASON_FILE);
        fs::write(&reason_path, reason).map_err(|e| DirectoryError::io(&reason_path, e))?;

        warn!(container = %id, reason, "quarantined container");
        Ok(())
    }
}

#[derive(Clone, Debug)]
enum MemoryContainer {
    Healthy(ContainerCreateInfo),
    Corrupt(String),
}

#[derive(Debug, Default)]
struct MemoryDirectoryState {
    containers: BTreeMap<ContainerId, MemoryContainer>,
    quarantined: Vec<(ContainerId, String)>,
}

/// In-memory container directory.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    state: RwLock<MemoryDirectoryState>,
    fail_listing: AtomicBool,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a healthy container structure.
    pub fn materialize(
        &self,
        id: ContainerId,
        info: &ContainerCreateInfo,
    ) -> Result<(), DirectoryError> {
        let mut state = self.state.write();
        if state.containers.contains_key(&id) {
            return Err(DirectoryError::AlreadyExists(id));
        }
        state.containers.insert(id, MemoryContainer::Healthy(*info));
        Ok(())
    }

    /// Add a structure that will fail inspection with `reason`.
    pub fn insert_corrupt(&self, id: ContainerId, reason: impl Into<String>) {
        self.state
            .write()
            .containers
            .insert(id, MemoryContainer::Corrupt(reason.into()));
    }

    /// Remove a structure. Removing an absent container succeeds.
    pub fn remove(&self, id: ContainerId) -> Result<(), DirectoryError> {
        self.state.write().containers.remove(&id);
        Ok(())
    }

    /// Containers quarantined so far, with their reasons.
    pub fn quarantined(&self) -> Vec<(ContainerId, String)> {
        self.state.read().quarantined.clone()
    }

    /// Make `list_container_ids` fail, for fault injection.
    pub fn set_fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }
}

impl ContainerDirectory for MemoryDirectory {
    fn list_container_ids(&self) -> Result<BTreeSet<ContainerId>, DirectoryError> {
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(DirectoryError::io(
                "<memory>",
                io::Error::new(io::ErrorKind::Other, "injected listing failure"),
            ));
        }
        Ok(self.state.read().containers.keys().copied().collect())
    }

    fn container_exists(&self, id: ContainerId) -> Result<bool, DirectoryError> {
        Ok(self.state.read().containers.contains_key(&id))
    }

    fn inspect_container(&self, id: ContainerId) -> Result<ContainerCreateInfo, InspectError> {
        match self.state.read().containers.get(&id) {
            Some(MemoryContainer::Healthy(info)) => Ok(*info),
            Some(MemoryContainer::Corrupt(reason)) => Err(InspectError::Integrity {
                id,
                reason: reason.clone(),
            }),
            None => Err(DirectoryError::NotFound(id).into()),
        }
    }

    fn quarantine(&self, id: ContainerId, reason: &str) -> Result<(), DirectoryError> {
        let mut state = self.state.write();
        if state.containers.remove(&id).is_none() {
            return Err(DirectoryError::NotFound(id));
        }
        state.quarantined.push((id, reason.to_string()));
        Ok(())
    }
}
