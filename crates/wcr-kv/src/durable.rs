//! Crash-safe engine backed by redb.
//!
//! Every table is a `redb` table with byte-slice keys and values. Write
//! transactions commit with redb's default `Durability::Immediate`, so a
//! successful `write_batch` has been fsynced before it returns.

use crate::engine::{BatchOp, KvEngine, KvPair, WriteBatch};
use crate::error::{EngineError, Result};
use parking_lot::RwLock;
use redb::{Database, TableDefinition, TableError};
use std::path::{Path, PathBuf};
use tracing::debug;

fn definition(name: &str) -> TableDefinition<'_, &'static [u8], &'static [u8]> {
    TableDefinition::new(name)
}

fn storage<E: Into<redb::Error>>(err: E) -> EngineError {
    let err: redb::Error = err.into();
    EngineError::from(err)
}

/// Engine persisting to a single redb file.
pub struct RedbEngine {
    path: PathBuf,
    db: RwLock<Option<Database>>,
}

impl RedbEngine {
    /// Open or create the database file at `path`.
    ///
    /// The parent directory must already exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let unavailable = |reason: String| EngineError::Unavailable {
            path: path.display().to_string(),
            reason,
        };

        match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() && !parent.is_dir() => {
                return Err(unavailable(format!(
                    "directory {} does not exist",
                    parent.display()
                )));
            }
            _ => {}
        }

        let db = Database::create(&path).map_err(|e| unavailable(e.to_string()))?;
        debug!(path = %path.display(), "opened redb store");

        Ok(RedbEngine {
            path,
            db: RwLock::new(Some(db)),
        })
    }

    /// Path of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn with_db<T>(&self, f: impl FnOnce(&Database) -> Result<T>) -> Result<T> {
        let guard = self.db.read();
        let db = guard.as_ref().ok_or(EngineError::Closed)?;
        f(db)
    }
}

impl KvEngine for RedbEngine {
    fn get(&self, table: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.with_db(|db| {
            let txn = db.begin_read().map_err(storage)?;
            let table = match txn.open_table(definition(table)) {
                Ok(t) => t,
                Err(TableError::TableDoesNotExist(_)) => return Ok(None),
                Err(e) => return Err(storage(e)),
            };
            let value = table.get(key).map_err(storage)?;
            Ok(value.map(|v| v.value().to_vec()))
        })
    }

    fn write_batch(&self, batch: WriteBatch) -> Result<()> {
        self.with_db(|db| {
            let txn = db.begin_write().map_err(storage)?;

            let applied = batch.ops().iter().try_for_each(|op| {
                let mut table = txn.open_table(definition(op.table())).map_err(storage)?;
                match op {
                    BatchOp::Put { key, value, .. } => {
                        table.insert(key.as_slice(), value.as_slice()).map_err(storage)?;
                    }
                    BatchOp::Delete { key, .. } => {
                        table.remove(key.as_slice()).map_err(storage)?;
                    }
                }
                Ok::<(), EngineError>(())
            });

            match applied {
                Ok(()) => txn.commit().map_err(storage),
                Err(e) => {
                    let _ = txn.abort();
                    Err(e)
                }
            }
        })
    }

    fn scan(&self, table: &str, start: &[u8], limit: usize) -> Result<Vec<KvPair>> {
        self.with_db(|db| {
            let txn = db.begin_read().map_err(storage)?;
            let table = match txn.open_table(definition(table)) {
                Ok(t) => t,
                Err(TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
                Err(e) => return Err(storage(e)),
            };

            let mut out = Vec::new();
            for entry in table.range(start..).map_err(storage)?.take(limit) {
                let (k, v) = entry.map_err(storage)?;
                out.push((k.value().to_vec(), v.value().to_vec()));
            }
            Ok(out)
        })
    }

    fn flush(&self) -> Result<()> {
        // Commits are already durable; nothing is buffered on our side.
        self.with_db(|_| Ok(()))
    }

    fn close(&self) -> Result<()> {
        if self.db.write().take().is_some() {
            debug!(path = %self.path.display(), "closed redb store");
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.db.read().is_none()
    }

    fn compact(&self) -> Result<bool> {
        let mut guard = self.db.write();
        let db = guard.as_mut().ok_or(EngineError::Closed)?;
        db.compact().map_err(storage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");

        let engine = RedbEngine::open(&path).unwrap();
        engine.put("t", b"k1", b"v1").unwrap();
        engine.put("t", b"k2", b"v2").unwrap();
        engine.delete("t", b"k1").unwrap();
        engine.close().unwrap();
        assert!(engine.is_closed());

        let engine = RedbEngine::open(&path).unwrap();
        assert_eq!(engine.get("t", b"k1").unwrap(), None);
        assert_eq!(engine.get("t", b"k2").unwrap(), Some(b"v2".to_vec()));
    }

    #[test]
    fn test_missing_table_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let engine = RedbEngine::open(dir.path().join("store.db")).unwrap();

        assert_eq!(engine.get("nope", b"k").unwrap(), None);
        assert!(engine.scan("nope", b"", 10).unwrap().is_empty());
    }

    #[test]
    fn test_scan_pages_in_key_order() {
        let dir = tempfile::tempdir().unwrap();
        let engine = RedbEngine::open(dir.path().join("store.db")).unwrap();

        let mut batch = WriteBatch::new();
        for k in [5u8, 1, 4, 2, 3] {
            batch.put("t", &[k], &[k * 10]);
        }
        engine.write_batch(batch).unwrap();

        let first = engine.scan("t", &[0], 2).unwrap();
        assert_eq!(first, vec![(vec![1], vec![10]), (vec![2], vec![20])]);

        let rest = engine.scan("t", &crate::successor(&first[1].0), 10).unwrap();
        let keys: Vec<u8> = rest.iter().map(|(k, _)| k[0]).collect();
        assert_eq!(keys, vec![3, 4, 5]);
    }

    #[test]
    fn test_missing_parent_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let result = RedbEngine::open(dir.path().join("absent").join("store.db"));
        assert!(matches!(result, Err(EngineError::Unavailable { .. })));
    }

    #[test]
    fn test_closed_engine_rejects_operations() {
        let dir = tempfile::tempdir().unwrap();
        let engine = RedbEngine::open(dir.path().join("store.db")).unwrap();
        engine.close().unwrap();

        assert_eq!(engine.get("t", b"k"), Err(EngineError::Closed));
        assert_eq!(engine.flush(), Err(EngineError::Closed));
        assert_eq!(engine.compact(), Err(EngineError::Closed));
    }
}
