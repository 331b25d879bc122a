//! Domain records
//!
//! These are both the stored values (through [`crate::record::Record`]) and
//! the JSON bodies of the HTTP API.

use serde::{Deserialize, Serialize};

use crate::error::{MetaError, Result};

/// File or directory
///
/// Serialized as the integer discriminator namenodes use: 0 file, 1 directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum INodeKind {
    #[default]
    File,
    Directory,
}

impl From<INodeKind> for i32 {
    fn from(kind: INodeKind) -> i32 {
        match kind {
            INodeKind::File => 0,
            INodeKind::Directory => 1,
        }
    }
}

impl TryFrom<i32> for INodeKind {
    type Error = String;

    fn try_from(value: i32) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(INodeKind::File),
            1 => Ok(INodeKind::Directory),
            other => Err(format!("unknown inode type {}", other)),
        }
    }
}

/// A namespace entry
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct INode {
    pub id: i64,
    pub name: String,
    pub permission: i64,
    pub modification_time: i64,
    pub access_time: i64,
    pub header: i64,
    #[serde(rename = "type")]
    pub kind: INodeKind,
    pub parent_id: i64,

    /// Lease holder, files only
    pub client_name: String,
    pub client_machine: String,
}

impl INode {
    pub fn is_directory(&self) -> bool {
        self.kind == INodeKind::Directory
    }

    /// Children listing form: identity and attributes, no client fields
    pub fn summary(&self) -> INode {
        INode {
            client_name: String::new(),
            client_machine: String::new(),
            ..self.clone()
        }
    }
}

/// A file with its chain resolved into blocks
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct INodeFile {
    #[serde(flatten)]
    pub inode: INode,

    #[serde(default)]
    pub blocks: Vec<Block>,
}

/// Value of a directory-child link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildLink {
    pub id: i64,
}

/// One replica location
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageLocation {
    pub data_node_id: String,
    pub storage_id: String,
}

impl StorageLocation {
    pub fn new(data_node_id: impl Into<String>, storage_id: impl Into<String>) -> Self {
        Self {
            data_node_id: data_node_id.into(),
            storage_id: storage_id.into(),
        }
    }
}

/// Stored block attributes, without replicas
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockMeta {
    pub id: i64,
    pub generation: i64,
    pub number_bytes: i64,
    pub replication: i32,
    pub collection_id: i64,
    pub block_pool_id: String,
}

impl BlockMeta {
    /// Reject negative counters
    pub fn validate(&self) -> Result<()> {
        if self.generation < 0 || self.number_bytes < 0 || self.replication < 0 || self.collection_id < 0 {
            return Err(MetaError::invalid(format!(
                "block {} fields must not be negative",
                self.id
            )));
        }
        Ok(())
    }
}

/// Replica set of one block
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockStorage {
    pub id: i64,
    pub nodes: Vec<StorageLocation>,
}

impl BlockStorage {
    pub fn new(id: i64) -> Self {
        Self { id, nodes: Vec::new() }
    }

    pub fn contains(&self, location: &StorageLocation) -> bool {
        self.nodes.iter().any(|n| n == location)
    }

    /// Add a replica; false if it was already present
    pub fn insert(&mut self, location: StorageLocation) -> bool {
        if self.contains(&location) {
            return false;
        }
        self.nodes.push(location);
        true
    }

    /// Union with another replica set, keeping first-seen order
    pub fn merge(&mut self, other: BlockStorage) {
        for location in other.nodes {
            self.insert(location);
        }
    }

    /// Remove a replica; false if it was not present
    pub fn remove(&mut self, location: &StorageLocation) -> bool {
        let before = self.nodes.len();
        self.nodes.retain(|n| n != location);
        self.nodes.len() != before
    }
}

/// A block as callers see it: attributes plus replicas
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Block {
    pub id: i64,
    pub generation: i64,
    pub number_bytes: i64,
    pub replication: i32,
    pub collection_id: i64,
    pub block_pool_id: String,
    pub storage: Vec<StorageLocation>,
}

impl Block {
    pub fn from_parts(meta: BlockMeta, storage: BlockStorage) -> Self {
        Self {
            id: meta.id,
            generation: meta.generation,
            number_bytes: meta.number_bytes,
            replication: meta.replication,
            collection_id: meta.collection_id,
            block_pool_id: meta.block_pool_id,
            storage: storage.nodes,
        }
    }

    /// Stored halves of this block
    pub fn split(&self) -> (BlockMeta, BlockStorage) {
        let meta = BlockMeta {
            id: self.id,
            generation: self.generation,
            number_bytes: self.number_bytes,
            replication: self.replication,
            collection_id: self.collection_id,
            block_pool_id: self.block_pool_id.clone(),
        };
        let mut storage = BlockStorage::new(self.id);
        for location in &self.storage {
            storage.insert(location.clone());
        }
        (meta, storage)
    }
}

/// Chain entry stored at `file-block(file, index)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileBlock {
    pub block_id: i64,
    pub number_bytes: i64,

    /// Id of the following block, 0 for the last one
    pub next_block_id: i64,
}

impl FileBlock {
    pub fn is_terminal(&self) -> bool {
        self.next_block_id == 0
    }
}

/// Timestamp oracle response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamps {
    pub timestamp: Vec<u64>,
    pub count: usize,
}
