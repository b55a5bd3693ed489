//! Storage engine trait and write batches.

use crate::error::Result;

/// A key/value pair read from a table.
pub type KvPair = (Vec<u8>, Vec<u8>);

/// A single operation in a [`WriteBatch`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BatchOp {
    Put {
        table: String,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    Delete {
        table: String,
        key: Vec<u8>,
    },
}

impl BatchOp {
    /// The table this operation targets.
    pub fn table(&self) -> &str {
        match self {
            BatchOp::Put { table, .. } | BatchOp::Delete { table, .. } => table,
        }
    }
}

/// An ordered list of writes applied as one durable unit.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    /// Create an empty batch.
    pub fn new() -> Self {
        WriteBatch { ops: Vec::new() }
    }

    pub fn put(&mut self, table: &str, key: &[u8], value: &[u8]) -> &mut Self {
        self.ops.push(BatchOp::Put {
            table: table.to_string(),
            key: key.to_vec(),
            value: value.to_vec(),
        });
        self
    }

    pub fn delete(&mut self, table: &str, key: &[u8]) -> &mut Self {
        self.ops.push(BatchOp::Delete {
            table: table.to_string(),
            key: key.to_vec(),
        });
        self
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Trait for durable, table-oriented key-value storage.
///
/// Implementations must make every successful write durable before
/// returning, and must apply a [`WriteBatch`] all-or-nothing. Keys within a
/// table are ordered byte-wise.
pub trait KvEngine: Send + Sync {
    /// Read a single key.
    fn get(&self, table: &str, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Apply every operation in the batch atomically.
    fn write_batch(&self, batch: WriteBatch) -> Result<()>;

    /// Return up to `limit` pairs with `key >= start`, in ascending key order.
    ///
    /// Each call observes a consistent snapshot of the table. A missing table
    /// scans as empty.
    fn scan(&self, table: &str, start: &[u8], limit: usize) -> Result<Vec<KvPair>>;

    /// Make sure nothing acknowledged is held only in memory.
    fn flush(&self) -> Result<()>;

    /// Release the underlying resources. Later calls fail with
    /// [`EngineError::Closed`](crate::EngineError::Closed).
    fn close(&self) -> Result<()>;

    fn is_closed(&self) -> bool;

    /// Write a single key.
    fn put(&self, table: &str, key: &[u8], value: &[u8]) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.put(table, key, value);
        self.write_batch(batch)
    }

    /// Remove a single key. Removing an absent key succeeds.
    fn delete(&self, table: &str, key: &[u8]) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.delete(table, key);
        self.write_batch(batch)
    }

    /// Reclaim unused space. Returns whether anything was compacted.
    fn compact(&self) -> Result<bool> {
        Ok(false)
    }
}

/// The smallest key strictly greater than `key`.
pub fn successor(key: &[u8]) -> Vec<u8> {
    let mut next = Vec::with_capacity(key.len() + 1);
    next.extend_from_slice(key);
    next.push(0);
    next
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_builder() {
        let mut batch = WriteBatch::new();
        assert!(batch.is_empty());

        batch.put("a", b"k1", b"v1").delete("b", b"k2");

        assert_eq!(batch.len(), 2);
        assert_eq!(batch.ops()[0].table(), "a");
        assert_eq!(
            batch.ops()[1],
            BatchOp::Delete {
                table: "b".to_string(),
                key: b"k2".to_vec()
            }
        );
    }

    #[test]
    fn test_successor_orders_between() {
        let key = b"abc".to_vec();
        let next = successor(&key);
        assert!(next > key);
        assert!(next < b"abd".to_vec());
        assert!(next < b"abc\x01".to_vec());
    }
}
