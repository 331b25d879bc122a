//! Transactional Key-Value Store
//!
//! The metadata layer only talks to these traits. Any engine with snapshot
//! isolation per transaction and atomic multi-key commit can sit behind them;
//! [`MemoryStore`] is the bundled one.
//!
//! ## Contract
//! - `begin` opens a transaction reading a consistent snapshot
//! - writes are buffered and become visible atomically at `commit`
//! - a commit whose write set overlaps a transaction committed after its
//!   snapshot fails with `Conflict`; nothing is retried
//! - `iter` walks keys in byte order over the snapshot plus the
//!   transaction's own writes

mod memory;
pub mod wal;

pub use memory::{MemoryStore, MemoryTransaction};

use crate::error::Result;

/// A transactional key-value engine
pub trait Storage: Send + Sync {
    /// Open a new transaction
    fn begin(&self) -> Result<Box<dyn Transaction>>;
}

/// One open transaction
pub trait Transaction: Send {
    /// Read a key; `Ok(None)` when absent
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Buffer a write
    fn set(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<()>;

    /// Buffer a delete (deleting an absent key is not an error)
    fn delete(&mut self, key: &[u8]) -> Result<()>;

    /// Cursor over `[start, end)`; `end = None` runs to the end of the key space
    fn iter(&self, start: &[u8], end: Option<&[u8]>) -> Result<Box<dyn KvCursor>>;

    /// Publish all buffered writes atomically
    fn commit(&mut self) -> Result<()>;

    /// Discard all buffered writes
    fn rollback(&mut self) -> Result<()>;
}

/// Ordered cursor returned by [`Transaction::iter`]; closed on drop
pub trait KvCursor: Send {
    fn valid(&self) -> bool;

    /// Current key; empty once the cursor is exhausted
    fn key(&self) -> &[u8];

    /// Current value; empty once the cursor is exhausted
    fn value(&self) -> &[u8];

    fn next(&mut self) -> Result<()>;
}

/// Source of strictly increasing timestamps
pub trait TimestampOracle: Send + Sync {
    fn timestamp(&self) -> Result<u64>;
}
