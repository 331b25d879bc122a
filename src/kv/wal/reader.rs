//! WAL Reader
//!
//! Handles reading entries from the WAL file.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;

use crate::error::{MetaError, Result};
use super::entry::{parse_header, HEADER_SIZE, MAX_ENTRY_SIZE};
use super::WalEntry;

/// Reads entries from the WAL file
pub struct WalReader {
    reader: BufReader<File>,

    /// Offset just past the last entry returned
    position: u64,
}

impl WalReader {
    /// Open a WAL file for reading
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            reader: BufReader::new(file),
            position: 0,
        })
    }

    /// Byte offset of the end of the last valid entry
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Read the next entry from the WAL
    ///
    /// `Ok(None)` at a clean end of file. A torn or damaged entry is a
    /// `WalCorruption` error and leaves `position` at the previous entry.
    pub fn next_entry(&mut self) -> Result<Option<WalEntry>> {
        let mut header = [0u8; HEADER_SIZE];
        let read = self.read_full(&mut header)?;
        if read == 0 {
            return Ok(None);
        }
        if read < HEADER_SIZE {
            return Err(MetaError::WalCorruption(format!(
                "torn header at offset {}: {} of {} bytes",
                self.position, read, HEADER_SIZE
            )));
        }

        let (lsn, crc, len) = parse_header(&header);
        if len > MAX_ENTRY_SIZE {
            return Err(MetaError::WalCorruption(format!(
                "entry length {} out of range at offset {}",
                len, self.position
            )));
        }

        let mut body = vec![0u8; len as usize];
        let read = self.read_full(&mut body)?;
        if read < body.len() {
            return Err(MetaError::WalCorruption(format!(
                "torn body at offset {}: {} of {} bytes",
                self.position, read, len
            )));
        }

        let entry = WalEntry::decode_body(lsn, crc, &body)?;
        self.position += (HEADER_SIZE + body.len()) as u64;
        Ok(Some(entry))
    }

    /// Iterate over all valid entries
    pub fn entries(self) -> WalIterator {
        WalIterator {
            reader: self,
            done: false,
        }
    }

    /// Fill `buf` as far as the file allows; returns bytes read
    fn read_full(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(filled)
    }
}

/// Iterator over WAL entries
///
/// Stops after the first error.
pub struct WalIterator {
    reader: WalReader,
    done: bool,
}

impl Iterator for WalIterator {
    type Item = Result<WalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.reader.next_entry() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
