//! WAL Writer
//!
//! Handles appending entries to the WAL file.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::config::WalSyncStrategy;
use crate::error::{MetaError, Result};
use super::{Operation, WalEntry, WalReader};

/// Writes entries to the WAL file
pub struct WalWriter {
    file: BufWriter<File>,

    /// LSN the next append will receive
    current_lsn: u64,

    sync_strategy: WalSyncStrategy,

    /// Entries appended since the last fsync
    unsynced: usize,

    /// File length up to the end of the last complete frame
    valid_len: u64,

    /// Set when a failed frame could not be cut off; no further appends
    broken: bool,
}

impl WalWriter {
    /// Open or create a WAL file
    ///
    /// Existing entries are scanned to continue the LSN sequence. The file
    /// should already have been through [`super::WalRecovery::recover`] so
    /// no torn tail remains.
    pub fn open(path: &Path, sync_strategy: WalSyncStrategy) -> Result<Self> {
        let mut last_lsn = 0;
        if path.exists() {
            let mut reader = WalReader::open(path)?;
            while let Ok(Some(entry)) = reader.next_entry() {
                last_lsn = entry.lsn;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let valid_len = file.metadata()?.len();
        Ok(Self {
            file: BufWriter::new(file),
            current_lsn: last_lsn + 1,
            sync_strategy,
            unsynced: 0,
            valid_len,
            broken: false,
        })
    }

    /// Append one committed batch; returns its LSN
    ///
    /// A frame that fails halfway is cut off again, so later appends never
    /// land behind a torn entry.
    pub fn append(&mut self, commit_ts: u64, operations: Vec<Operation>) -> Result<u64> {
        if self.broken {
            return Err(MetaError::Storage(
                "WAL writer stopped after an unrecoverable write failure".to_string(),
            ));
        }

        let lsn = self.current_lsn;
        let entry = WalEntry::new(lsn, commit_ts, operations);
        let frame = entry.serialize()?;

        let written = self
            .file
            .write_all(&frame)
            .and_then(|_| self.file.flush());
        if let Err(e) = written {
            tracing::warn!(lsn, error = %e, "WAL append failed, discarding partial frame");
            if let Err(reset_err) = self.discard_partial() {
                tracing::error!(error = %reset_err, "could not cut off partial WAL frame");
                self.broken = true;
            }
            return Err(e.into());
        }
        self.valid_len += frame.len() as u64;
        self.current_lsn += 1;
        self.unsynced += 1;

        let due = match self.sync_strategy {
            WalSyncStrategy::EveryWrite => true,
            WalSyncStrategy::EveryNEntries { count } => self.unsynced >= count.max(1),
        };
        if due {
            self.sync()?;
        }
        Ok(lsn)
    }

    /// Drop buffered bytes and truncate the file to the last complete frame
    fn discard_partial(&mut self) -> Result<()> {
        let fresh = BufWriter::new(self.file.get_ref().try_clone()?);
        // into_parts hands back the buffer without flushing it
        let (_file, _unflushed) = std::mem::replace(&mut self.file, fresh).into_parts();
        self.file.get_ref().set_len(self.valid_len)?;
        Ok(())
    }

    /// Force sync to disk
    pub fn sync(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.get_ref().sync_data()?;
        self.unsynced = 0;
        Ok(())
    }

    /// Get the current LSN
    pub fn current_lsn(&self) -> u64 {
        self.current_lsn
    }
}

impl Drop for WalWriter {
    fn drop(&mut self) {
        if self.unsynced > 0 {
            let _ = self.sync();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::wal::WalRecovery;
    use tempfile::TempDir;

    fn put(key: &[u8]) -> Vec<Operation> {
        vec![Operation::Put { key: key.to_vec(), value: b"v".to_vec() }]
    }

    #[test]
    fn test_partial_frame_is_cut_off() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("test.wal");
        let mut writer = WalWriter::open(&path, WalSyncStrategy::EveryWrite).unwrap();
        writer.append(1, put(b"a")).unwrap();

        // Half a frame reaches the file, the rest is still buffered
        writer.file.write_all(&[0xAB; 9]).unwrap();
        writer.file.flush().unwrap();
        writer.file.write_all(&[0xCD; 5]).unwrap();
        writer.discard_partial().unwrap();

        writer.append(2, put(b"b")).unwrap();
        drop(writer);

        let (entries, result) = WalRecovery::recover(&path).unwrap();
        assert_eq!(entries.iter().map(|e| e.commit_ts).collect::<Vec<_>>(), vec![1, 2]);
        assert!(!result.was_truncated);
    }

    #[test]
    fn test_broken_writer_refuses_appends() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("test.wal");
        let mut writer = WalWriter::open(&path, WalSyncStrategy::EveryWrite).unwrap();
        writer.broken = true;

        assert!(writer.append(1, put(b"a")).is_err());
        assert_eq!(writer.current_lsn(), 1);
    }
}
