//! Key Codec
//!
//! Maps entities onto the flat key space.
//!
//! ## Layout
//! ```text
//! ┌────────────┬──────────────┬───────────────────────────┐
//! │ Marker (4) │   Id (8, BE) │ Secondary                 │
//! ├────────────┼──────────────┼───────────────────────────┤
//! │ {bm}       │ block id     │ -                         │
//! │ {bs}       │ block id     │ -                         │
//! │ {in}       │ inode id     │ -                         │
//! │ {dc}       │ parent id    │ child name (UTF-8 bytes)  │
//! │ {fb}       │ file id      │ chain index (8, BE)       │
//! └────────────┴──────────────┴───────────────────────────┘
//! ```
//!
//! Markers have equal width and differ, so the namespaces are disjoint.
//! Ids and indexes are fixed-width big-endian, so byte order is numeric
//! order and `marker + id` is a prefix of exactly that entity's members.

use crate::error::{MetaError, Result};

const MARKER_LEN: usize = 4;
const ID_LEN: usize = 8;

pub const BLOCK_META: &[u8; MARKER_LEN] = b"{bm}";
pub const BLOCK_STORAGE: &[u8; MARKER_LEN] = b"{bs}";
pub const INODE: &[u8; MARKER_LEN] = b"{in}";
pub const DIRECTORY_CHILD: &[u8; MARKER_LEN] = b"{dc}";
pub const FILE_BLOCK: &[u8; MARKER_LEN] = b"{fb}";

/// Width of a `directory-child(parent)` scan prefix
pub const CHILD_PREFIX_LEN: usize = MARKER_LEN + ID_LEN;

/// Width of a full `file-block(file, index)` key
pub const FILE_BLOCK_KEY_LEN: usize = MARKER_LEN + 2 * ID_LEN;

fn with_id(marker: &[u8; MARKER_LEN], id: i64, extra: usize) -> Vec<u8> {
    let mut key = Vec::with_capacity(MARKER_LEN + ID_LEN + extra);
    key.extend_from_slice(marker);
    key.extend_from_slice(&id.to_be_bytes());
    key
}

pub fn block_meta(id: i64) -> Vec<u8> {
    with_id(BLOCK_META, id, 0)
}

pub fn block_storage(id: i64) -> Vec<u8> {
    with_id(BLOCK_STORAGE, id, 0)
}

pub fn inode(id: i64) -> Vec<u8> {
    with_id(INODE, id, 0)
}

pub fn directory_child(parent_id: i64, name: &str) -> Vec<u8> {
    let mut key = with_id(DIRECTORY_CHILD, parent_id, name.len());
    key.extend_from_slice(name.as_bytes());
    key
}

/// Prefix covering every child link of `parent_id`
pub fn directory_child_prefix(parent_id: i64) -> Vec<u8> {
    with_id(DIRECTORY_CHILD, parent_id, 0)
}

pub fn file_block(file_id: i64, index: u64) -> Vec<u8> {
    let mut key = with_id(FILE_BLOCK, file_id, ID_LEN);
    key.extend_from_slice(&index.to_be_bytes());
    key
}

/// Prefix covering every chain entry of `file_id`
pub fn file_block_prefix(file_id: i64) -> Vec<u8> {
    with_id(FILE_BLOCK, file_id, 0)
}

/// Child name carried by a key scanned under `prefix`
pub fn child_name(prefix: &[u8], key: &[u8]) -> Result<String> {
    let rest = key.strip_prefix(prefix).ok_or_else(|| {
        MetaError::Corrupted(format!("key {} is outside scan prefix", key.escape_ascii()))
    })?;
    if prefix.len() != CHILD_PREFIX_LEN || rest.is_empty() {
        return Err(MetaError::Corrupted(format!(
            "malformed directory-child key {}",
            key.escape_ascii()
        )));
    }
    String::from_utf8(rest.to_vec()).map_err(|_| {
        MetaError::Corrupted(format!("child name in {} is not UTF-8", key.escape_ascii()))
    })
}

/// Chain index carried by a key scanned under `prefix`
pub fn file_block_index(prefix: &[u8], key: &[u8]) -> Result<u64> {
    let rest = key.strip_prefix(prefix).ok_or_else(|| {
        MetaError::Corrupted(format!("key {} is outside scan prefix", key.escape_ascii()))
    })?;
    let bytes: [u8; ID_LEN] = rest.try_into().map_err(|_| {
        MetaError::Corrupted(format!("malformed file-block key {}", key.escape_ascii()))
    })?;
    Ok(u64::from_be_bytes(bytes))
}

/// Human-readable rendering of a key for error messages and logs
pub fn describe(key: &[u8]) -> String {
    if key.len() < MARKER_LEN + ID_LEN {
        return key.escape_ascii().to_string();
    }
    let (marker, rest) = key.split_at(MARKER_LEN);
    let (id, tail) = rest.split_at(ID_LEN);
    let mut id_bytes = [0u8; ID_LEN];
    id_bytes.copy_from_slice(id);
    let id = i64::from_be_bytes(id_bytes);

    match marker {
        m if m == BLOCK_META && tail.is_empty() => format!("block-meta {}", id),
        m if m == BLOCK_STORAGE && tail.is_empty() => format!("block-storage {}", id),
        m if m == INODE && tail.is_empty() => format!("inode {}", id),
        m if m == DIRECTORY_CHILD => {
            format!("directory-child {}/{:?}", id, String::from_utf8_lossy(tail))
        }
        m if m == FILE_BLOCK && tail.len() == ID_LEN => {
            let mut index = [0u8; ID_LEN];
            index.copy_from_slice(tail);
            format!("file-block {}#{}", id, u64::from_be_bytes(index))
        }
        _ => key.escape_ascii().to_string(),
    }
}

/// Smallest key greater than every key starting with `prefix`
pub fn prefix_end(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < u8::MAX {
            end.push(last + 1);
            return Some(end);
        }
    }
    None
}
