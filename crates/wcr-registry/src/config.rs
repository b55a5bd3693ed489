//! Registry configuration.

use crate::error::{RegistryError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// What reconciliation does with a structure that fails its integrity check.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityPolicy {
    /// Hand the structure to the directory layer's quarantine.
    #[default]
    Quarantine,
    /// Abort the mount.
    Fail,
}

/// Configuration for a volume's registry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// File name of the store inside the volume directory.
    pub db_file_name: String,

    /// Entries fetched per engine scan while iterating.
    pub scan_batch_size: usize,

    /// Number of per-container lock stripes.
    pub lock_stripes: usize,

    /// Whether reconciliation re-checks both sides after repairing.
    pub verify_after_repair: bool,

    /// Create the store if it does not exist yet.
    pub create_if_missing: bool,

    pub on_integrity_failure: IntegrityPolicy,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        RegistryConfig {
            db_file_name: "container.db".to_string(),
            scan_batch_size: 256,
            lock_stripes: 64,
            verify_after_repair: true,
            create_if_missing: true,
            on_integrity_failure: IntegrityPolicy::Quarantine,
        }
    }
}

impl RegistryConfig {
    /// Load a configuration from a JSON file. Missing fields take defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .map_err(|e| RegistryError::Config(format!("{}: {}", path.display(), e)))?;
        let config: RegistryConfig = serde_json::from_slice(&bytes)
            .map_err(|e| RegistryError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the registry cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.db_file_name.is_empty() {
            return Err(RegistryError::Config("db_file_name must not be empty".into()));
        }
        if self.scan_batch_size == 0 {
            return Err(RegistryError::Config("scan_batch_size must be at least 1".into()));
        }
        if self.lock_stripes == 0 {
            return Err(RegistryError::Config("lock_stripes must be at least 1".into()));
        }
        Ok(())
    }
}

/// Builder for registry configuration.
pub struct RegistryConfigBuilder {
    config: RegistryConfig,
}

impl RegistryConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: RegistryConfig::default(),
        }
    }

    pub fn db_file_name(mut self, name: impl Into<String>) -> Self {
        self.config.db_file_name = name.into();
        self
    }

    pub fn scan_batch_size(mut self, size: usize) -> Self {
        self.config.scan_batch_size = size;
        self
    }

    pub fn lock_stripes(mut self, stripes: usize) -> Self {
        self.config.lock_stripes = stripes;
        self
    }

    pub fn verify_after_repair(mut self, enabled: bool) -> Self {
        self.config.verify_after_repair = enabled;
        self
    }

    pub fn create_if_missing(mut self, enabled: bool) -> Self {
        self.config.create_if_missing = enabled;
        self
    }

    pub fn on_integrity_failure(mut self, policy: IntegrityPolicy) -> Self {
        self.config.on_integrity_failure = policy;
        self
    }

    pub fn build(self) -> RegistryConfig {
        self.config
    }
}

impl Default for RegistryConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
