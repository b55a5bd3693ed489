//! Startup reconciliation between the registry and the volume.
//!
//! Runs once per mount, before the registry is handed to anyone else:
//!
//! ```text
//! Scanning ──▶ DivergenceDetected ──▶ Repairing ──▶ Consistent
//!     └───────────────────────────────────▲
//! ```
//!
//! With `E` the registered ids and `D` the ids present on the volume:
//! - `E \ D`: creation crashed before the structure was built; drop the record.
//! - `D \ E`: the structure outlived its record; restore the record from the
//!   structure, or quarantine the structure if it fails inspection.
//! - `E ∩ D`: consistent, except that a record still in `PendingCreate` has
//!   its structure inspected. A structure that fails is quarantined and the
//!   record dropped, the same as if the build had never started.
//!
//! All record repairs are committed as a single batch.

use crate::config::{IntegrityPolicy, RegistryConfig};
use crate::directory::{ContainerDirectory, InspectError};
use crate::error::{RegistryError, Result};
use crate::registry::{RegistryOp, WitnessedRegistry};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use wcr_core::{ContainerCreateInfo, ContainerId, CreationState};
use wcr_kv::KvEngine;

/// Phases of a reconciliation run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconcileState {
    Scanning,
    DivergenceDetected,
    Repairing,
    Consistent,
}

impl ReconcileState {
    /// Whether `next` may follow `self`.
    pub fn can_advance_to(self, next: ReconcileState) -> bool {
        use ReconcileState::*;
        matches!(
            (self, next),
            (Scanning, DivergenceDetected)
                | (Scanning, Repairing)
                | (DivergenceDetected, Repairing)
                | (Repairing, Consistent)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == ReconcileState::Consistent
    }
}

impl fmt::Display for ReconcileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReconcileState::Scanning => "SCANNING",
            ReconcileState::DivergenceDetected => "DIVERGENCE_DETECTED",
            ReconcileState::Repairing => "REPAIRING",
            ReconcileState::Consistent => "CONSISTENT",
        };
        f.write_str(s)
    }
}

/// Outcome of a reconciliation run.
#[derive(Clone, Debug, Default)]
pub struct ReconcileReport {
    /// States visited, in order.
    pub states: Vec<ReconcileState>,

    /// Registry entries found while scanning.
    pub registry_entries: usize,

    /// Container structures found while scanning.
    pub physical_containers: usize,

    /// Records dropped because no structure existed.
    pub removed_stale: Vec<ContainerId>,

    /// Records recreated from an existing structure.
    pub restored: Vec<ContainerId>,

    /// Records of unfinished creations whose structure failed inspection.
    pub removed_incomplete: Vec<ContainerId>,

    /// Structures handed to quarantine, with the integrity failure.
    pub quarantined: Vec<(ContainerId, String)>,

    pub duration: Duration,
}

impl ReconcileReport {
    /// Total number of corrective actions taken.
    pub fn repairs(&self) -> usize {
        self.removed_stale.len()
            + self.removed_incomplete.len()
            + self.restored.len()
            + self.quarantined.len()
    }

    /// Whether the registry and the volume already agreed.
    pub fn is_clean(&self) -> bool {
        self.repairs() == 0
    }

    pub fn final_state(&self) -> Option<ReconcileState> {
        self.states.last().copied()
    }
}

/// One-shot reconciliation of a registry against a container directory.
pub struct Reconciler<'a, E: KvEngine, D: ContainerDirectory + ?Sized> {
    registry: &'a WitnessedRegistry<E>,
    directory: &'a D,
    verify_after_repair: bool,
    integrity_policy: IntegrityPolicy,
    report: ReconcileReport,
}

impl<'a, E: KvEngine, D: ContainerDirectory + ?Sized> Reconciler<'a, E, D> {
    pub fn new(registry: &'a WitnessedRegistry<E>, directory: &'a D) -> Self {
        Reconciler {
            registry,
            directory,
            verify_after_repair: true,
            integrity_policy: IntegrityPolicy::Quarantine,
            report: ReconcileReport::default(),
        }
    }

    /// Take the verification and integrity settings from a registry config.
    pub fn with_config(mut self, config: &RegistryConfig) -> Self {
        self.verify_after_repair = config.verify_after_repair;
        self.integrity_policy = config.on_integrity_failure;
        self
    }

    fn enter(&mut self, next: ReconcileState) {
        if let Some(current) = self.report.final_state() {
            debug_assert!(
                current.can_advance_to(next),
                "illegal reconcile transition {} -> {}",
                current,
                next
            );
        }
        debug!(state = %next, "reconcile state");
        self.report.states.push(next);
    }

    /// Run to completion. On error nothing beyond what was already committed
    /// has been applied, and the caller must not expose the registry.
    pub fn run(mut self) -> Result<ReconcileReport> {
        let started = Instant::now();

        self.enter(ReconcileState::Scanning);
        let witnessed: BTreeMap<ContainerId, ContainerCreateInfo> =
            self.registry.iter().collect::<Result<_>>()?;
        let physical = self.directory.list_container_ids()?;
        self.report.registry_entries = witnessed.len();
        self.report.physical_containers = physical.len();

        let stale: Vec<(ContainerId, ContainerCreateInfo)> = witnessed
            .iter()
            .filter(|(id, _)| !physical.contains(id))
            .map(|(id, info)| (*id, *info))
            .collect();
        let orphaned: Vec<ContainerId> = physical
            .iter()
            .filter(|id| !witnessed.contains_key(id))
            .copied()
            .collect();

        let mut incomplete = Vec::new();
        for (id, info) in &witnessed {
            if info.state != CreationState::PendingCreate || !physical.contains(id) {
                continue;
            }
            match self.directory.inspect_container(*id) {
                Ok(_) => {}
                Err(InspectError::Integrity { id, reason }) => {
                    self.on_integrity_failure(id, &reason)?;
                    incomplete.push((id, reason));
                }
                Err(InspectError::Directory(e)) => return Err(e.into()),
            }
        }

        if !stale.is_empty() || !orphaned.is_empty() || !incomplete.is_empty() {
            self.enter(ReconcileState::DivergenceDetected);
            info!(
                stale = stale.len(),
                orphaned = orphaned.len(),
                incomplete = incomplete.len(),
                "registry diverges from volume"
            );
        }

        self.enter(ReconcileState::Repairing);
        let mut ops = Vec::with_capacity(stale.len() + orphaned.len() + incomplete.len());
        let mut to_quarantine = Vec::new();

        for (id, info) in &stale {
            if info.state == CreationState::PendingCreate {
                debug!(container = %id, "dropping record of unfinished creation");
            } else {
                warn!(
                    container = %id,
                    state = %info.state,
                    "dropping record whose container structure is gone"
                );
            }
            ops.push(RegistryOp::Delete(*id));
        }

        let mut removed_incomplete = Vec::with_capacity(incomplete.len());
        for (id, reason) in incomplete {
            warn!(container = %id, reason = %reason, "dropping record of interrupted creation");
            ops.push(RegistryOp::Delete(id));
            removed_incomplete.push(id);
            to_quarantine.push((id, reason));
        }

        let mut restored = Vec::new();
        for id in orphaned {
            match self.directory.inspect_container(id) {
                Ok(info) => {
                    info!(container = %id, state = %info.state, "restoring record from container structure");
                    ops.push(RegistryOp::Put(id, info));
                    restored.push(id);
                }
                Err(InspectError::Integrity { id, reason }) => {
                    self.on_integrity_failure(id, &reason)?;
                    to_quarantine.push((id, reason));
                }
                Err(InspectError::Directory(e)) => return Err(e.into()),
            }
        }

        self.registry.batch(ops)?;
        self.report.removed_stale = stale.into_iter().map(|(id, _)| id).collect();
        self.report.removed_incomplete = removed_incomplete;
        self.report.restored = restored;

        for (id, reason) in to_quarantine {
            self.directory.quarantine(id, &reason)?;
            self.report.quarantined.push((id, reason));
        }

        if self.verify_after_repair {
            self.verify()?;
        }

        self.enter(ReconcileState::Consistent);
        self.report.duration = started.elapsed();
        info!(
            entries = self.report.registry_entries,
            containers = self.report.physical_containers,
            removed = self.report.removed_stale.len() + self.report.removed_incomplete.len(),
            restored = self.report.restored.len(),
            quarantined = self.report.quarantined.len(),
            "reconciliation complete"
        );
        Ok(self.report)
    }

    fn on_integrity_failure(&self, id: ContainerId, reason: &str) -> Result<()> {
        match self.integrity_policy {
            IntegrityPolicy::Quarantine => Ok(()),
            IntegrityPolicy::Fail => Err(RegistryError::Integrity {
                id,
                reason: reason.to_string(),
            }),
        }
    }

    fn verify(&self) -> Result<()> {
        let witnessed = self.registry.container_ids()?;
        let physical = self.directory.list_container_ids()?;
        if witnessed == physical {
            return Ok(());
        }

        let only_registry: BTreeSet<_> = witnessed.difference(&physical).collect();
        let only_volume: BTreeSet<_> = physical.difference(&witnessed).collect();
        Err(RegistryError::ReconciliationFailed(format!(
            "registry and volume still differ: registry-only {:?}, volume-only {:?}",
            only_registry, only_volume
        )))
    }
}
