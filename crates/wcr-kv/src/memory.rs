//! In-memory implementation of KvEngine.

use crate::engine::{BatchOp, KvEngine, KvPair, WriteBatch};
use crate::error::{EngineError, Result};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

type Tables = HashMap<String, BTreeMap<Vec<u8>, Vec<u8>>>;

/// In-memory engine.
///
/// The table data lives behind a shared handle, so [`MemoryEngine::reopen`]
/// behaves like opening the same on-disk store again after the previous
/// handle was closed or dropped.
#[derive(Debug, Default)]
pub struct MemoryEngine {
    tables: Arc<RwLock<Tables>>,
    closed: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryEngine {
    /// Create a new empty engine.
    pub fn new() -> Self {
        MemoryEngine {
            tables: Arc::new(RwLock::new(HashMap::new())),
            closed: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Open a fresh handle over the same data.
    pub fn reopen(&self) -> Self {
        MemoryEngine {
            tables: Arc::clone(&self.tables),
            closed: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Make every subsequent write fail, for fault injection.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of keys in a table.
    pub fn table_len(&self, table: &str) -> usize {
        self.tables.read().get(table).map(|t| t.len()).unwrap_or(0)
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(EngineError::Closed)
        } else {
            Ok(())
        }
    }
}

impl KvEngine for MemoryEngine {
    fn get(&self, table: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.check_open()?;
        Ok(self
            .tables
            .read()
            .get(table)
            .and_then(|t| t.get(key))
            .cloned())
    }

    fn write_batch(&self, batch: WriteBatch) -> Result<()> {
        self.check_open()?;
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(EngineError::Storage("injected write failure".to_string()));
        }

        // One write guard for the whole batch: readers see all of it or none.
        let mut tables = self.tables.write();
        for op in batch.ops() {
            match op {
                BatchOp::Put { table, key, value } => {
                    tables
                        .entry(table.clone())
                        .or_default()
                        .insert(key.clone(), value.clone());
                }
                BatchOp::Delete { table, key } => {
                    if let Some(t) = tables.get_mut(table) {
                        t.remove(key);
                    }
                }
            }
        }
        Ok(())
    }

    fn scan(&self, table: &str, start: &[u8], limit: usize) -> Result<Vec<KvPair>> {
        self.check_open()?;
        let tables = self.tables.read();
        let Some(t) = tables.get(table) else {
            return Ok(Vec::new());
        };
        Ok(t
            .range::<[u8], _>((Bound::Included(start), Bound::Unbounded))
            .take(limit)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn flush(&self) -> Result<()> {
        self.check_open()
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_delete() {
        let engine = MemoryEngine::new();

        engine.put("t", b"k", b"v").unwrap();
        assert_eq!(engine.get("t", b"k").unwrap(), Some(b"v".to_vec()));

        engine.delete("t", b"k").unwrap();
        assert_eq!(engine.get("t", b"k").unwrap(), None);

        // Deleting again is fine, including from a table that never existed.
        engine.delete("t", b"k").unwrap();
        engine.delete("other", b"k").unwrap();
    }

    #[test]
    fn test_scan_is_ordered_and_bounded() {
        let engine = MemoryEngine::new();
        for k in [3u8, 1, 2, 5, 4] {
            engine.put("t", &[k], &[k]).unwrap();
        }

        let page = engine.scan("t", &[2], 2).unwrap();
        assert_eq!(page, vec![(vec![2], vec![2]), (vec![3], vec![3])]);

        assert!(engine.scan("missing", b"", 10).unwrap().is_empty());
    }

    #[test]
    fn test_failed_batch_writes_nothing() {
        let engine = MemoryEngine::new();
        engine.set_fail_writes(true);

        let mut batch = WriteBatch::new();
        batch.put("t", b"a", b"1").put("t", b"b", b"2");
        assert!(engine.write_batch(batch).is_err());
        assert_eq!(engine.table_len("t"), 0);
    }

    #[test]
    fn test_closed_engine_rejects_operations() {
        let engine = MemoryEngine::new();
        engine.put("t", b"k", b"v").unwrap();
        engine.close().unwrap();

        assert!(engine.is_closed());
        assert_eq!(engine.get("t", b"k"), Err(EngineError::Closed));
        assert_eq!(engine.put("t", b"k", b"v"), Err(EngineError::Closed));
    }

    #[test]
    fn test_reopen_sees_previous_writes() {
        let engine = MemoryEngine::new();
        engine.put("t", b"k", b"v").unwrap();
        engine.close().unwrap();

        let reopened = engine.reopen();
        assert!(!reopened.is_closed());
        assert_eq!(reopened.get("t", b"k").unwrap(), Some(b"v".to_vec()));
    }
}
