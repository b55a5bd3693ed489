//! # wcr-kv
//!
//! Durable key-value engine abstraction for the Cairn container registry.
//!
//! This crate provides:
//! - [`KvEngine`]: named byte-keyed tables with atomic batches and ordered scans
//! - [`RedbEngine`]: crash-safe engine on top of `redb`
//! - [`MemoryEngine`]: in-memory engine for tests and simulations
//!
//! ## Example
//!
//! ```rust
//! use wcr_kv::{KvEngine, MemoryEngine, WriteBatch};
//!
//! let engine = MemoryEngine::new();
//!
//! let mut batch = WriteBatch::new();
//! batch.put("t", b"a", b"1").put("t", b"b", b"2");
//! engine.write_batch(batch).unwrap();
//!
//! assert_eq!(engine.get("t", b"a").unwrap(), Some(b"1".to_vec()));
//! assert_eq!(engine.scan("t", b"", 10).unwrap().len(), 2);
//! ```

mod durable;
mod engine;
mod error;
mod memory;

pub use durable::RedbEngine;
pub use engine::{successor, BatchOp, KvEngine, KvPair, WriteBatch};
pub use error::{EngineError, Result};
pub use memory::MemoryEngine;
