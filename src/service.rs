//! Metadata Service
//!
//! Request-level operations over the namespace and block chain managers.
//! Each call checks the lifecycle gate, then runs as one transaction.
//!
//! ```text
//!   api ──► MetaService ──┬──► Namespace ──┐
//!                         ├──► BlockChain ─┼──► Executor ──► Storage
//!                         └──► TimestampOracle
//! ```

use std::sync::Arc;

use crate::chain::BlockChain;
use crate::context::Context;
use crate::error::{ensure_id, MetaError, Result};
use crate::keys;
use crate::kv::{MemoryStore, Storage, TimestampOracle};
use crate::lifecycle::Lifecycle;
use crate::model::{
    Block, BlockMeta, BlockStorage, INode, INodeFile, INodeKind, StorageLocation, Timestamps,
};
use crate::namespace::Namespace;
use crate::txn::Executor;

/// Largest batch one `timestamps` call hands out
pub const MAX_TIMESTAMPS: usize = 10_000;

/// The metadata service shared by all request workers
pub struct MetaService {
    executor: Executor,
    namespace: Namespace,
    chain: BlockChain,
    oracle: Arc<dyn TimestampOracle>,
    lifecycle: Lifecycle,
}

impl MetaService {
    pub fn new(store: Arc<dyn Storage>, oracle: Arc<dyn TimestampOracle>) -> Self {
        let executor = Executor::new(store);
        Self {
            namespace: Namespace::new(executor.clone()),
            chain: BlockChain::new(executor.clone()),
            executor,
            oracle,
            lifecycle: Lifecycle::new(),
        }
    }

    /// Service over a bundled store, which also serves as the oracle
    pub fn with_memory_store(store: MemoryStore) -> Self {
        let store = Arc::new(store);
        Self::new(store.clone(), store)
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn chain(&self) -> &BlockChain {
        &self.chain
    }

    pub fn is_available(&self) -> bool {
        self.lifecycle.is_available()
    }

    /// Stop accepting requests; in-flight calls run to completion
    pub fn close(&self) {
        if self.lifecycle.close() {
            tracing::info!("metadata service closed");
        }
    }

    // =========================================================================
    // Timestamp Oracle
    // =========================================================================

    pub fn timestamps(&self, count: usize) -> Result<Timestamps> {
        self.lifecycle.ensure_available()?;
        if count == 0 {
            return Err(MetaError::invalid("count should not be less than 1"));
        }
        if count > MAX_TIMESTAMPS {
            return Err(MetaError::invalid(format!(
                "count should not be more than {}",
                MAX_TIMESTAMPS
            )));
        }
        let timestamp = (0..count)
            .map(|_| self.oracle.timestamp())
            .collect::<Result<Vec<_>>>()?;
        Ok(Timestamps { timestamp, count })
    }

    // =========================================================================
    // Blocks
    // =========================================================================

    /// Block attributes with replicas
    pub fn get_block(&self, ctx: &Context, id: i64) -> Result<Block> {
        self.lifecycle.ensure_available()?;
        ensure_id("block id", id)?;
        self.executor.with_tx(ctx, |tx| {
            let meta: BlockMeta = tx.get(&keys::block_meta(id))?;
            let storage = tx
                .get_opt::<BlockStorage>(&keys::block_storage(id))?
                .unwrap_or_else(|| BlockStorage::new(id));
            Ok(Block::from_parts(meta, storage))
        })
    }

    pub fn put_block_meta(&self, ctx: &Context, id: i64, mut meta: BlockMeta) -> Result<()> {
        self.lifecycle.ensure_available()?;
        ensure_id("block id", id)?;
        meta.id = id;
        meta.validate()?;
        self.executor.with_tx(ctx, |tx| tx.set(keys::block_meta(id), &meta))?;
        tracing::debug!(id, "block meta written");
        Ok(())
    }

    pub fn delete_block_meta(&self, ctx: &Context, id: i64) -> Result<()> {
        self.lifecycle.ensure_available()?;
        ensure_id("block id", id)?;
        self.executor.with_tx(ctx, |tx| tx.delete(&keys::block_meta(id)))
    }

    pub fn get_block_storage(&self, ctx: &Context, id: i64) -> Result<BlockStorage> {
        self.lifecycle.ensure_available()?;
        ensure_id("block id", id)?;
        self.executor.with_tx(ctx, |tx| tx.get(&keys::block_storage(id)))
    }

    /// Add one replica; adding a known replica is a no-op
    pub fn add_block_storage(&self, ctx: &Context, id: i64, location: StorageLocation) -> Result<()> {
        self.lifecycle.ensure_available()?;
        ensure_id("block id", id)?;
        Self::ensure_location(&location)?;
        self.executor.with_tx(ctx, |tx| {
            let key = keys::block_storage(id);
            let mut storage = tx
                .get_opt::<BlockStorage>(&key)?
                .unwrap_or_else(|| BlockStorage::new(id));
            if storage.insert(location) {
                tx.set(key, &storage)?;
            }
            Ok(())
        })
    }

    pub fn remove_block_storage(&self, ctx: &Context, id: i64, location: StorageLocation) -> Result<()> {
        self.lifecycle.ensure_available()?;
        ensure_id("block id", id)?;
        Self::ensure_location(&location)?;
        self.executor.with_tx(ctx, |tx| {
            let key = keys::block_storage(id);
            let mut storage: BlockStorage = tx.get(&key)?;
            if storage.remove(&location) {
                tx.set(key, &storage)?;
            }
            Ok(())
        })
    }

    fn ensure_location(location: &StorageLocation) -> Result<()> {
        if location.data_node_id.is_empty() || location.storage_id.is_empty() {
            return Err(MetaError::invalid("data node id and storage id must not be empty"));
        }
        Ok(())
    }

    // =========================================================================
    // Files
    // =========================================================================

    /// A file with its blocks in chain order; `simple` skips the chain
    pub fn get_file(&self, ctx: &Context, id: i64, simple: bool) -> Result<INodeFile> {
        self.lifecycle.ensure_available()?;
        self.executor.with_tx(ctx, |tx| {
            let inode = Namespace::get_inode_in(tx, id)?;
            Self::ensure_kind(&inode, INodeKind::File)?;
            let blocks = if simple {
                Vec::new()
            } else {
                BlockChain::scan_blocks_in(tx, id)?
            };
            Ok(INodeFile { inode, blocks })
        })
    }

    pub fn put_file(&self, ctx: &Context, id: i64, mut node: INode) -> Result<()> {
        self.lifecycle.ensure_available()?;
        node.id = id;
        node.kind = INodeKind::File;
        self.namespace.create_or_replace(ctx, &node)
    }

    /// Replace an existing file record and its whole chain
    pub fn update_file(&self, ctx: &Context, id: i64, mut file: INodeFile) -> Result<()> {
        self.lifecycle.ensure_available()?;
        file.inode.id = id;
        file.inode.kind = INodeKind::File;
        self.executor.with_tx(ctx, |tx| {
            Namespace::get_inode_in(tx, id)?;
            Namespace::create_or_replace_in(tx, &file.inode)?;
            BlockChain::replace_chain_in(tx, id, &file.blocks)
        })?;
        tracing::debug!(id, blocks = file.blocks.len(), "file replaced");
        Ok(())
    }

    pub fn delete_file(&self, ctx: &Context, id: i64) -> Result<()> {
        self.lifecycle.ensure_available()?;
        self.namespace.delete_file(ctx, id)
    }

    pub fn get_file_block(&self, ctx: &Context, file_id: i64, block_id: i64) -> Result<Block> {
        self.lifecycle.ensure_available()?;
        ensure_id("block id", block_id)?;
        self.chain.get_block(ctx, file_id, block_id)
    }

    /// Allocate `block_id` at the end of the chain, or refresh it in place
    pub fn put_file_block(&self, ctx: &Context, file_id: i64, block_id: i64, generation: i64) -> Result<u64> {
        self.lifecycle.ensure_available()?;
        let meta = BlockMeta {
            id: block_id,
            generation,
            ..Default::default()
        };
        self.chain
            .upsert_block(ctx, file_id, block_id, meta, BlockStorage::new(block_id))
    }

    /// Upsert a block from its full description; returns the stored block
    pub fn update_file_block(&self, ctx: &Context, file_id: i64, block_id: i64, block: Block) -> Result<Block> {
        self.lifecycle.ensure_available()?;
        let block = Block { id: block_id, ..block };
        let (meta, storage) = block.split();
        self.executor.with_tx(ctx, |tx| {
            BlockChain::upsert_block_in(tx, file_id, block_id, meta, storage)?;
            BlockChain::get_block_in(tx, file_id, block_id)
        })
    }

    pub fn delete_file_block(&self, ctx: &Context, file_id: i64, block_id: i64) -> Result<()> {
        self.lifecycle.ensure_available()?;
        self.chain.delete_block(ctx, file_id, block_id)
    }

    pub fn truncate_file(&self, ctx: &Context, file_id: i64, size: i64) -> Result<()> {
        self.lifecycle.ensure_available()?;
        self.executor.with_tx(ctx, |tx| {
            let inode = Namespace::get_inode_in(tx, file_id)?;
            Self::ensure_kind(&inode, INodeKind::File)?;
            BlockChain::truncate_in(tx, file_id, size)
        })
    }

    // =========================================================================
    // Directories
    // =========================================================================

    pub fn get_directory(&self, ctx: &Context, id: i64) -> Result<INode> {
        self.lifecycle.ensure_available()?;
        let inode = self.namespace.get_inode(ctx, id)?;
        Self::ensure_kind(&inode, INodeKind::Directory)?;
        Ok(inode)
    }

    pub fn put_directory(&self, ctx: &Context, id: i64, mut node: INode) -> Result<()> {
        self.lifecycle.ensure_available()?;
        node.id = id;
        node.kind = INodeKind::Directory;
        self.namespace.create_or_replace(ctx, &node)
    }

    /// Replace an existing directory record; children are untouched
    pub fn update_directory(&self, ctx: &Context, id: i64, mut node: INode) -> Result<()> {
        self.lifecycle.ensure_available()?;
        node.id = id;
        node.kind = INodeKind::Directory;
        self.executor.with_tx(ctx, |tx| {
            Namespace::get_inode_in(tx, id)?;
            Namespace::create_or_replace_in(tx, &node)
        })
    }

    pub fn delete_directory(&self, ctx: &Context, id: i64) -> Result<usize> {
        self.lifecycle.ensure_available()?;
        self.namespace.delete_directory(ctx, id)
    }

    pub fn list_children(&self, ctx: &Context, id: i64, simple: bool) -> Result<Vec<INode>> {
        self.lifecycle.ensure_available()?;
        self.namespace.list_children(ctx, id, simple)
    }

    pub fn get_child(&self, ctx: &Context, parent_id: i64, name: &str) -> Result<INode> {
        self.lifecycle.ensure_available()?;
        self.namespace.get_child(ctx, parent_id, name, true)
    }

    /// Create or replace `node` as child `name` of `parent_id`
    pub fn put_child(&self, ctx: &Context, parent_id: i64, name: &str, mut node: INode) -> Result<()> {
        self.lifecycle.ensure_available()?;
        node.parent_id = parent_id;
        node.name = name.to_string();
        self.namespace.create_or_replace(ctx, &node)
    }

    pub fn delete_child(&self, ctx: &Context, parent_id: i64, name: &str) -> Result<()> {
        self.lifecycle.ensure_available()?;
        self.namespace.delete_child(ctx, parent_id, name)
    }

    // =========================================================================
    // Inodes
    // =========================================================================

    pub fn reparent(&self, ctx: &Context, id: i64, old_parent: i64, new_parent: i64) -> Result<()> {
        self.lifecycle.ensure_available()?;
        self.namespace.reparent(ctx, id, old_parent, new_parent)
    }

    fn ensure_kind(inode: &INode, expected: INodeKind) -> Result<()> {
        if inode.kind != expected {
            return Err(MetaError::invalid(format!(
                "inode {} is a {:?}, expected a {:?}",
                inode.id, inode.kind, expected
            )));
        }
        Ok(())
    }
}
