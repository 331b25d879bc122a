//! In-memory MVCC store
//!
//! BTreeMap of key → version list wrapped in a RwLock, with an optional WAL
//! for durability.
//!
//! ## Concurrency Model
//! - **begin**: takes the read lock just long enough to pick a snapshot
//!   timestamp and register it as active
//! - **reads/iteration**: read lock, resolve the newest version at or below
//!   the snapshot, then overlay the transaction's own buffered writes
//! - **commit**: write lock; first-committer-wins conflict check over the
//!   write set, allocate a commit timestamp, append to the WAL, apply
//!
//! Versions older than the oldest other active snapshot are pruned on commit.
//!
//! Oracle timestamps are handed out from a window whose upper bound is
//! logged to the WAL before use, so a restart resumes above every timestamp
//! already issued.

use std::collections::BTreeMap;
use std::fs;
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::config::{Config, WalSyncStrategy};
use crate::error::{MetaError, Result};
use super::wal::{Operation, WalEntry, WalReader, WalRecovery, WalWriter};
use super::{KvCursor, Storage, TimestampOracle, Transaction};

/// Stored value of one version
#[derive(Debug, Clone, PartialEq)]
enum Entry {
    /// A live value
    Value(Vec<u8>),

    /// A tombstone (deleted key)
    Tombstone,
}

#[derive(Debug, Clone)]
struct Version {
    commit_ts: u64,
    entry: Entry,
}

/// Versions per key, ascending by commit timestamp
type VersionMap = BTreeMap<Vec<u8>, Vec<Version>>;

/// Buffered writes of one transaction; `None` is a delete
type WriteSet = BTreeMap<Vec<u8>, Option<Vec<u8>>>;

struct Shared {
    data: RwLock<VersionMap>,

    /// Last issued timestamp (commits and oracle requests share it)
    clock: AtomicU64,

    /// Open transactions by snapshot timestamp
    active: Mutex<BTreeMap<u64, usize>>,

    /// Highest timestamp the WAL guarantees a restart will not reissue
    reserved: Mutex<u64>,

    wal: Option<Mutex<WalWriter>>,
}

/// Transactional in-memory store, durable when opened with a data directory
#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
    wal_path: Option<PathBuf>,
}

impl MemoryStore {
    const WAL_FILENAME: &'static str = "meta.wal";

    /// Oracle timestamps reserved per WAL record
    pub const TIMESTAMP_WINDOW: u64 = 1_000;

    /// A store with no durability
    pub fn new() -> Self {
        Self::from_parts(VersionMap::new(), 0, None, None)
    }

    /// Open the store described by `config`
    ///
    /// Without a data directory this is [`MemoryStore::new`]. Otherwise the
    /// WAL under the directory is recovered and replayed before serving.
    pub fn open(config: &Config) -> Result<Self> {
        match &config.data_dir {
            Some(dir) => Self::open_dir(dir, config.wal_sync_strategy),
            None => Ok(Self::new()),
        }
    }

    /// Open (or create) a durable store rooted at `dir`
    pub fn open_dir(dir: &Path, sync_strategy: WalSyncStrategy) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let wal_path = dir.join(Self::WAL_FILENAME);

        let (data, clock) = if wal_path.exists() {
            let (entries, result) = WalRecovery::recover(&wal_path)?;
            tracing::info!(
                recovered = result.entries_recovered,
                corrupted = result.entries_corrupted,
                last_lsn = result.last_lsn,
                truncated = result.was_truncated,
                "WAL recovery finished"
            );
            Self::replay(entries)
        } else {
            (VersionMap::new(), 0)
        };

        let writer = WalWriter::open(&wal_path, sync_strategy)?;
        Ok(Self::from_parts(data, clock, Some(writer), Some(wal_path)))
    }

    /// Load the committed state under `dir` without opening it for writes
    ///
    /// The WAL is read up to its first damaged entry and left untouched.
    pub fn open_read_only(dir: &Path) -> Result<Self> {
        let wal_path = dir.join(Self::WAL_FILENAME);
        if !wal_path.exists() {
            return Err(MetaError::Storage(format!("no WAL at {}", wal_path.display())));
        }
        let entries = WalReader::open(&wal_path)?
            .entries()
            .map_while(|entry| entry.ok())
            .collect();
        let (data, clock) = Self::replay(entries);
        Ok(Self::from_parts(data, clock, None, Some(wal_path)))
    }

    /// Latest committed version of every key in `entries`
    fn replay(entries: Vec<WalEntry>) -> (VersionMap, u64) {
        let mut data = VersionMap::new();
        let mut clock = 0;
        for entry in entries {
            clock = clock.max(entry.commit_ts);
            for op in entry.operations {
                // No reader exists yet, so only the latest version matters
                match op {
                    Operation::Put { key, value } => {
                        let version = Version {
                            commit_ts: entry.commit_ts,
                            entry: Entry::Value(value),
                        };
                        data.insert(key, vec![version]);
                    }
                    Operation::Delete { key } => {
                        data.remove(&key);
                    }
                }
            }
        }
        (data, clock)
    }

    fn from_parts(data: VersionMap, clock: u64, wal: Option<WalWriter>, wal_path: Option<PathBuf>) -> Self {
        Self {
            shared: Arc::new(Shared {
                data: RwLock::new(data),
                clock: AtomicU64::new(clock),
                active: Mutex::new(BTreeMap::new()),
                reserved: Mutex::new(clock),
                wal: wal.map(Mutex::new),
            }),
            wal_path,
        }
    }

    /// Open a transaction with its concrete type
    pub fn begin_memory(&self) -> MemoryTransaction {
        let start_ts = {
            let _data = self.shared.data.read();
            let ts = self.shared.clock.load(Ordering::SeqCst);
            *self.shared.active.lock().entry(ts).or_insert(0) += 1;
            ts
        };
        MemoryTransaction {
            shared: Arc::clone(&self.shared),
            start_ts,
            writes: WriteSet::new(),
            finished: false,
        }
    }

    /// Number of live keys at the latest commit
    pub fn key_count(&self) -> usize {
        let data = self.shared.data.read();
        data.values()
            .filter(|versions| matches!(versions.last(), Some(Version { entry: Entry::Value(_), .. })))
            .count()
    }

    /// Number of stored versions, tombstones included
    pub fn version_count(&self) -> usize {
        self.shared.data.read().values().map(Vec::len).sum()
    }

    /// Number of open transactions
    pub fn active_transactions(&self) -> usize {
        self.shared.active.lock().values().sum()
    }

    /// Path of the WAL, when durable
    pub fn wal_path(&self) -> Option<&Path> {
        self.wal_path.as_deref()
    }

    /// Force the WAL to disk
    pub fn sync(&self) -> Result<()> {
        if let Some(wal) = &self.shared.wal {
            wal.lock().sync()?;
        }
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Storage for MemoryStore {
    fn begin(&self) -> Result<Box<dyn Transaction>> {
        Ok(Box::new(self.begin_memory()))
    }
}

impl TimestampOracle for MemoryStore {
    fn timestamp(&self) -> Result<u64> {
        let ts = self.shared.clock.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.reserve(ts)?;
        Ok(ts)
    }
}

impl Shared {
    /// Make sure `ts` lies inside a window already recorded in the WAL
    fn reserve(&self, ts: u64) -> Result<()> {
        if let Some(wal) = &self.wal {
            let mut reserved = self.reserved.lock();
            if ts > *reserved {
                let mark = ts.saturating_add(MemoryStore::TIMESTAMP_WINDOW);
                // An empty batch whose commit_ts carries the window bound
                wal.lock().append(mark, Vec::new())?;
                tracing::debug!(mark, "timestamp window reserved");
                *reserved = mark;
            }
        }
        Ok(())
    }

    fn unregister(&self, start_ts: u64) {
        let mut active = self.active.lock();
        if let Some(count) = active.get_mut(&start_ts) {
            *count -= 1;
            if *count == 0 {
                active.remove(&start_ts);
            }
        }
    }

    /// Conflict-check and publish a write set
    fn apply(&self, start_ts: u64, writes: WriteSet) -> Result<()> {
        let mut data = self.data.write();

        for key in writes.keys() {
            if let Some(latest) = data.get(key).and_then(|versions| versions.last()) {
                if latest.commit_ts > start_ts {
                    return Err(MetaError::Conflict(format!(
                        "key {} was committed at {} after snapshot {}",
                        printable(key),
                        latest.commit_ts,
                        start_ts
                    )));
                }
            }
        }

        let commit_ts = self.clock.fetch_add(1, Ordering::SeqCst) + 1;

        if let Some(wal) = &self.wal {
            let operations = writes
                .iter()
                .map(|(key, value)| match value {
                    Some(value) => Operation::Put { key: key.clone(), value: value.clone() },
                    None => Operation::Delete { key: key.clone() },
                })
                .collect();
            wal.lock().append(commit_ts, operations)?;
        }

        // Oldest snapshot other than the committing transaction's own
        let horizon = self
            .active
            .lock()
            .iter()
            .find(|(ts, count)| **ts != start_ts || **count > 1)
            .map(|(ts, _)| *ts)
            .unwrap_or(commit_ts);

        for (key, value) in writes {
            let entry = match value {
                Some(value) => Entry::Value(value),
                None => Entry::Tombstone,
            };
            let versions = data.entry(key.clone()).or_default();
            versions.push(Version { commit_ts, entry });
            prune(versions, horizon);

            let only_tombstone = versions.len() == 1 && versions[0].entry == Entry::Tombstone;
            if only_tombstone && versions[0].commit_ts <= horizon {
                data.remove(&key);
            }
        }

        Ok(())
    }
}

/// Drop versions no open snapshot can still see
fn prune(versions: &mut Vec<Version>, horizon: u64) {
    if let Some(newest_visible) = versions.iter().rposition(|v| v.commit_ts <= horizon) {
        versions.drain(..newest_visible);
    }
}

fn visible(versions: &[Version], ts: u64) -> Option<&Entry> {
    versions.iter().rev().find(|v| v.commit_ts <= ts).map(|v| &v.entry)
}

fn printable(key: &[u8]) -> String {
    key.escape_ascii().to_string()
}

/// A transaction against [`MemoryStore`]
pub struct MemoryTransaction {
    shared: Arc<Shared>,
    start_ts: u64,
    writes: WriteSet,
    finished: bool,
}

impl MemoryTransaction {
    /// Snapshot timestamp this transaction reads at
    pub fn start_ts(&self) -> u64 {
        self.start_ts
    }

    fn ensure_open(&self) -> Result<()> {
        if self.finished {
            return Err(MetaError::Storage("transaction already finished".to_string()));
        }
        Ok(())
    }

    fn finish(&mut self) {
        if !self.finished {
            self.finished = true;
            self.shared.unregister(self.start_ts);
        }
    }
}

impl Transaction for MemoryTransaction {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.ensure_open()?;
        if let Some(buffered) = self.writes.get(key) {
            return Ok(buffered.clone());
        }

        let data = self.shared.data.read();
        let value = data
            .get(key)
            .and_then(|versions| visible(versions, self.start_ts))
            .and_then(|entry| match entry {
                Entry::Value(value) => Some(value.clone()),
                Entry::Tombstone => None,
            });
        Ok(value)
    }

    fn set(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        self.ensure_open()?;
        self.writes.insert(key, Some(value));
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<()> {
        self.ensure_open()?;
        self.writes.insert(key.to_vec(), None);
        Ok(())
    }

    fn iter(&self, start: &[u8], end: Option<&[u8]>) -> Result<Box<dyn KvCursor>> {
        self.ensure_open()?;
        if matches!(end, Some(end) if end <= start) {
            return Ok(Box::new(VecCursor::new(Vec::new())));
        }

        let range = (
            Bound::Included(start.to_vec()),
            match end {
                Some(end) => Bound::Excluded(end.to_vec()),
                None => Bound::Unbounded,
            },
        );

        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
        {
            let data = self.shared.data.read();
            for (key, versions) in data.range(range.clone()) {
                if let Some(Entry::Value(value)) = visible(versions, self.start_ts) {
                    merged.insert(key.clone(), value.clone());
                }
            }
        }
        for (key, value) in self.writes.range(range) {
            match value {
                Some(value) => {
                    merged.insert(key.clone(), value.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }

        Ok(Box::new(VecCursor::new(merged.into_iter().collect())))
    }

    fn commit(&mut self) -> Result<()> {
        self.ensure_open()?;
        let writes = std::mem::take(&mut self.writes);
        let result = if writes.is_empty() {
            Ok(())
        } else {
            self.shared.apply(self.start_ts, writes)
        };
        self.finish();
        result
    }

    fn rollback(&mut self) -> Result<()> {
        self.writes.clear();
        self.finish();
        Ok(())
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Cursor over a materialized snapshot range
struct VecCursor {
    entries: Vec<(Vec<u8>, Vec<u8>)>,
    pos: usize,
}

impl VecCursor {
    fn new(entries: Vec<(Vec<u8>, Vec<u8>)>) -> Self {
        Self { entries, pos: 0 }
    }
}

impl KvCursor for VecCursor {
    fn valid(&self) -> bool {
        self.pos < self.entries.len()
    }

    fn key(&self) -> &[u8] {
        self.entries.get(self.pos).map(|(k, _)| k.as_slice()).unwrap_or(&[])
    }

    fn value(&self) -> &[u8] {
        self.entries.get(self.pos).map(|(_, v)| v.as_slice()).unwrap_or(&[])
    }

    fn next(&mut self) -> Result<()> {
        if self.valid() {
            self.pos += 1;
        }
        Ok(())
    }
}
