//! The witnessed container table.
//!
//! A typed view over one engine table mapping [`ContainerId`] to
//! [`ContainerCreateInfo`]. Every write goes straight to the engine, which
//! makes it durable before returning; nothing is cached here.

use crate::error::{RegistryError, Result};
use std::collections::BTreeSet;
use std::sync::Arc;
use wcr_core::{ContainerCreateInfo, ContainerId, RecordCodec};
use wcr_kv::{successor, KvEngine, KvPair, WriteBatch};

/// Engine table holding the registry records.
pub const CONTAINER_TABLE: &str = "container_create_info";

/// Default number of entries fetched per scan while iterating.
pub const DEFAULT_SCAN_BATCH_SIZE: usize = 256;

/// A write in a registry batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegistryOp {
    Put(ContainerId, ContainerCreateInfo),
    Delete(ContainerId),
}

/// Durable `ContainerId -> ContainerCreateInfo` table.
pub struct WitnessedRegistry<E: KvEngine> {
    engine: Arc<E>,
    scan_batch_size: usize,
}

impl<E: KvEngine> WitnessedRegistry<E> {
    /// Create a registry over an already opened engine.
    pub fn new(engine: Arc<E>) -> Self {
        Self::with_scan_batch_size(engine, DEFAULT_SCAN_BATCH_SIZE)
    }

    pub fn with_scan_batch_size(engine: Arc<E>, scan_batch_size: usize) -> Self {
        WitnessedRegistry {
            engine,
            scan_batch_size: scan_batch_size.max(1),
        }
    }

    /// The underlying engine.
    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }

    /// Write a record, replacing any existing one for `id`.
    pub fn put(&self, id: ContainerId, info: &ContainerCreateInfo) -> Result<()> {
        let record = RecordCodec::encode(id, info);
        self.engine.put(CONTAINER_TABLE, &record.key, &record.value)?;
        Ok(())
    }

    pub fn get(&self, id: ContainerId) -> Result<Option<ContainerCreateInfo>> {
        let key = RecordCodec::encode_key(id);
        match self.engine.get(CONTAINER_TABLE, &key)? {
            Some(value) => RecordCodec::decode_value(&value)
                .map(Some)
                .map_err(|e| RegistryError::corrupt(&key, e)),
            None => Ok(None),
        }
    }

    pub fn contains(&self, id: ContainerId) -> Result<bool> {
        let key = RecordCodec::encode_key(id);
        Ok(self.engine.get(CONTAINER_TABLE, &key)?.is_some())
    }

    /// Remove a record. Removing an absent id is a no-op.
    pub fn delete(&self, id: ContainerId) -> Result<()> {
        self.engine.delete(CONTAINER_TABLE, &RecordCodec::encode_key(id))?;
        Ok(())
    }

    /// Apply all operations as one durable unit. An empty batch writes nothing.
    pub fn batch(&self, ops: impl IntoIterator<Item = RegistryOp>) -> Result<()> {
        let mut batch = WriteBatch::new();
        for op in ops {
            match op {
                RegistryOp::Put(id, info) => {
                    let record = RecordCodec::encode(id, &info);
                    batch.put(CONTAINER_TABLE, &record.key, &record.value);
                }
                RegistryOp::Delete(id) => {
                    batch.delete(CONTAINER_TABLE, &RecordCodec::encode_key(id));
                }
            }
        }
        if batch.is_empty() {
            return Ok(());
        }
        self.engine.write_batch(batch)?;
        Ok(())
    }

    pub fn batch_put(
        &self,
        entries: impl IntoIterator<Item = (ContainerId, ContainerCreateInfo)>,
    ) -> Result<()> {
        self.batch(entries.into_iter().map(|(id, info)| RegistryOp::Put(id, info)))
    }

    pub fn batch_delete(&self, ids: impl IntoIterator<Item = ContainerId>) -> Result<()> {
        self.batch(ids.into_iter().map(RegistryOp::Delete))
    }

    /// Iterate over all records in ascending id order.
    pub fn iter(&self) -> RegistryIter<'_, E> {
        RegistryIter::new(self)
    }

    /// All registered ids.
    pub fn container_ids(&self) -> Result<BTreeSet<ContainerId>> {
        self.iter().map(|entry| entry.map(|(id, _)| id)).collect()
    }

    pub fn len(&self) -> Result<usize> {
        self.iter().try_fold(0, |n, entry| entry.map(|_| n + 1))
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.engine.scan(CONTAINER_TABLE, &[], 1)?.is_empty())
    }
}

/// Lazy iterator over registry records.
///
/// Records are fetched a page at a time; each page resumes strictly after the
/// last key of the previous one. An entry that exists and is not modified for
/// the whole iteration is yielded exactly once. Entries written or removed
/// while iterating may or may not be observed.
pub struct RegistryIter<'a, E: KvEngine> {
    registry: &'a WitnessedRegistry<E>,
    next_start: Option<Vec<u8>>,
    page: std::vec::IntoIter<KvPair>,
}

impl<'a, E: KvEngine> RegistryIter<'a, E> {
    fn new(registry: &'a WitnessedRegistry<E>) -> Self {
        RegistryIter {
            registry,
            next_start: Some(Vec::new()),
            page: Vec::new().into_iter(),
        }
    }

    /// Start over from the smallest id.
    pub fn restart(&mut self) {
        self.next_start = Some(Vec::new());
        self.page = Vec::new().into_iter();
    }

    fn fetch_page(&mut self, start: Vec<u8>) -> Result<bool> {
        let limit = self.registry.scan_batch_size;
        let page = self.registry.engine.scan(CONTAINER_TABLE, &start, limit)?;

        // A short page means the table is exhausted.
        if page.len() == limit {
            self.next_start = page.last().map(|(key, _)| successor(key));
        }
        let fetched = !page.is_empty();
        self.page = page.into_iter();
        Ok(fetched)
    }
}

impl<E: KvEngine> Iterator for RegistryIter<'_, E> {
    type Item = Result<(ContainerId, ContainerCreateInfo)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((key, value)) = self.page.next() {
                return Some(
                    RecordCodec::decode(&key, &value).map_err(|e| RegistryError::corrupt(&key, e)),
                );
            }

            let start = self.next_start.take()?;
            match self.fetch_page(start) {
                Ok(true) => continue,
                Ok(false) => return None,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
