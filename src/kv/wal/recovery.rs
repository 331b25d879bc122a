//! WAL Recovery
//!
//! Handles crash recovery by replaying the WAL.
//!
//! Replay stops at the first damaged entry. Entries are whole transactions
//! and later transactions may have read what a damaged one wrote, so
//! nothing after the damage is trusted.

use std::fs::OpenOptions;
use std::path::Path;

use crate::error::{MetaError, Result};
use super::{WalEntry, WalReader};

/// Handles WAL recovery after crash
pub struct WalRecovery;

/// Result of a recovery operation
#[derive(Debug, Default)]
pub struct RecoveryResult {
    /// Number of entries successfully recovered
    pub entries_recovered: u64,

    /// Number of damaged entries found (replay stops at the first)
    pub entries_corrupted: u64,

    /// Last valid LSN
    pub last_lsn: u64,

    /// Whether the WAL was truncated (damaged tail removed)
    pub was_truncated: bool,
}

impl WalRecovery {
    /// Recover entries from a WAL file
    ///
    /// This will:
    /// 1. Read all valid entries
    /// 2. Stop at the first damaged or torn entry
    /// 3. Truncate the file to the end of the last valid entry
    /// 4. Return all valid entries in order
    pub fn recover(path: &Path) -> Result<(Vec<WalEntry>, RecoveryResult)> {
        let (entries, mut result, valid_len) = Self::scan(path)?;

        if result.entries_corrupted > 0 {
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(valid_len)?;
            file.sync_all()?;
            result.was_truncated = true;
            tracing::warn!(
                path = %path.display(),
                valid_len,
                "WAL truncated after damaged entry"
            );
        }

        Ok((entries, result))
    }

    /// Verify integrity of a WAL file without modifying it
    pub fn verify(path: &Path) -> Result<RecoveryResult> {
        let (_, result, _) = Self::scan(path)?;
        Ok(result)
    }

    fn scan(path: &Path) -> Result<(Vec<WalEntry>, RecoveryResult, u64)> {
        let mut reader = WalReader::open(path)?;
        let mut entries = Vec::new();
        let mut result = RecoveryResult::default();

        loop {
            match reader.next_entry() {
                Ok(Some(entry)) => {
                    if entry.lsn <= result.last_lsn {
                        tracing::warn!(lsn = entry.lsn, last = result.last_lsn, "WAL lsn went backwards");
                        result.entries_corrupted += 1;
                        break;
                    }
                    result.last_lsn = entry.lsn;
                    result.entries_recovered += 1;
                    entries.push(entry);
                }
                Ok(None) => break,
                Err(MetaError::WalCorruption(reason)) => {
                    tracing::warn!(%reason, "damaged WAL entry");
                    result.entries_corrupted += 1;
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        // A backwards lsn is detected after the reader advanced past it
        let valid_len = if result.entries_corrupted > 0 {
            Self::valid_prefix_len(path, entries.len())?
        } else {
            reader.position()
        };
        Ok((entries, result, valid_len))
    }

    /// Byte length of the first `count` entries
    fn valid_prefix_len(path: &Path, count: usize) -> Result<u64> {
        let mut reader = WalReader::open(path)?;
        for _ in 0..count {
            reader.next_entry()?;
        }
        Ok(reader.position())
    }
}
