//! WAL Entry definitions
//!
//! Defines the structure of individual WAL log entries.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{MetaError, Result};

/// Header size: LSN (8) + CRC (4) + Len (4)
pub const HEADER_SIZE: usize = 16;

/// Largest body accepted when reading (64 MB)
pub const MAX_ENTRY_SIZE: u32 = 64 * 1024 * 1024;

/// A single entry in the WAL: one committed transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalEntry {
    /// Log Sequence Number - monotonically increasing
    pub lsn: u64,

    /// Commit timestamp the batch became visible at
    pub commit_ts: u64,

    /// Timestamp (unix millis) when entry was created
    pub timestamp: u64,

    /// Writes of the transaction, in the order they were buffered
    pub operations: Vec<Operation>,
}

/// Operations that can be logged
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    /// Put a key-value pair
    Put { key: Vec<u8>, value: Vec<u8> },

    /// Delete a key
    Delete { key: Vec<u8> },
}

impl Operation {
    pub fn key(&self) -> &[u8] {
        match self {
            Operation::Put { key, .. } | Operation::Delete { key } => key,
        }
    }
}

impl WalEntry {
    pub fn new(lsn: u64, commit_ts: u64, operations: Vec<Operation>) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            lsn,
            commit_ts,
            timestamp,
            operations,
        }
    }

    /// Frame the entry: header followed by the bincode body
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let body = bincode::serialize(self)?;
        if body.len() > MAX_ENTRY_SIZE as usize {
            return Err(MetaError::Storage(format!(
                "WAL entry too large: {} bytes (max {})",
                body.len(),
                MAX_ENTRY_SIZE
            )));
        }

        let mut frame = Vec::with_capacity(HEADER_SIZE + body.len());
        frame.extend_from_slice(&self.lsn.to_be_bytes());
        frame.extend_from_slice(&Self::compute_crc(&body).to_be_bytes());
        frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
        frame.extend_from_slice(&body);
        Ok(frame)
    }

    /// Decode one framed entry from the start of `bytes`.
    ///
    /// Returns the entry and the number of bytes consumed.
    pub fn deserialize(bytes: &[u8]) -> Result<(Self, usize)> {
        if bytes.len() < HEADER_SIZE {
            return Err(MetaError::WalCorruption(format!(
                "incomplete header: expected {} bytes, got {}",
                HEADER_SIZE,
                bytes.len()
            )));
        }
        let (lsn, crc, len) = parse_header(&bytes[..HEADER_SIZE]);
        if len > MAX_ENTRY_SIZE {
            return Err(MetaError::WalCorruption(format!("entry length {} out of range", len)));
        }
        let total = HEADER_SIZE + len as usize;
        if bytes.len() < total {
            return Err(MetaError::WalCorruption(format!(
                "incomplete body: expected {} bytes, got {}",
                total,
                bytes.len()
            )));
        }
        let entry = Self::decode_body(lsn, crc, &bytes[HEADER_SIZE..total])?;
        Ok((entry, total))
    }

    /// Verify and decode a body whose header was already parsed
    pub(crate) fn decode_body(lsn: u64, crc: u32, body: &[u8]) -> Result<Self> {
        let actual = Self::compute_crc(body);
        if actual != crc {
            return Err(MetaError::WalCorruption(format!(
                "CRC mismatch at lsn {}: stored {:#010x}, computed {:#010x}",
                lsn, crc, actual
            )));
        }
        let entry: WalEntry = bincode::deserialize(body)
            .map_err(|e| MetaError::WalCorruption(format!("undecodable entry at lsn {}: {}", lsn, e)))?;
        if entry.lsn != lsn {
            return Err(MetaError::WalCorruption(format!(
                "header lsn {} does not match body lsn {}",
                lsn, entry.lsn
            )));
        }
        Ok(entry)
    }

    pub fn compute_crc(data: &[u8]) -> u32 {
        crc32fast::hash(data)
    }
}

/// Split a 16-byte header into (lsn, crc, len)
pub(crate) fn parse_header(header: &[u8]) -> (u64, u32, u32) {
    let mut lsn = [0u8; 8];
    lsn.copy_from_slice(&header[0..8]);
    let mut crc = [0u8; 4];
    crc.copy_from_slice(&header[8..12]);
    let mut len = [0u8; 4];
    len.copy_from_slice(&header[12..16]);
    (u64::from_be_bytes(lsn), u32::from_be_bytes(crc), u32::from_be_bytes(len))
}
