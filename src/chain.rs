//! Block Chain Manager
//!
//! A file's blocks are stored as index-addressed chain entries
//! (`file-block(file, index)`), each naming its block and the id of the next
//! one. Scanning the file's prefix yields the entries in index order, so the
//! chain is rebuilt from the key space alone.
//!
//! The chain grows by appending. Updating a block already in the chain keeps
//! its position and successor. Deleting a block in the middle does not relink
//! its predecessor; use [`BlockChain::truncate`] or a full file delete to
//! shorten a chain consistently.
//!
//! Every operation has an `_in` form that runs inside a caller's
//! [`TxScope`] so it can be composed with other writes.

use std::collections::HashSet;

use crate::context::Context;
use crate::error::{ensure_id, MetaError, Result};
use crate::keys;
use crate::model::{Block, BlockMeta, BlockStorage, FileBlock};
use crate::record::Record;
use crate::txn::{Executor, TxScope};

/// A chain entry with the index it is stored under
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainEntry {
    pub index: u64,
    pub entry: FileBlock,
}

/// Maintains per-file block chains and replica sets
#[derive(Clone)]
pub struct BlockChain {
    executor: Executor,
}

impl BlockChain {
    pub fn new(executor: Executor) -> Self {
        Self { executor }
    }

    // =========================================================================
    // Self-contained operations (one transaction each)
    // =========================================================================

    /// Blocks of `file_id` in chain order
    pub fn scan_blocks(&self, ctx: &Context, file_id: i64) -> Result<Vec<Block>> {
        self.executor.with_tx(ctx, |tx| Self::scan_blocks_in(tx, file_id))
    }

    /// Raw chain entries of `file_id` in index order
    pub fn entries(&self, ctx: &Context, file_id: i64) -> Result<Vec<ChainEntry>> {
        self.executor.with_tx(ctx, |tx| Self::entries_in(tx, file_id))
    }

    /// Index of `block_id` in the chain, or the append position if absent
    pub fn block_index(&self, ctx: &Context, file_id: i64, block_id: i64) -> Result<u64> {
        self.executor.with_tx(ctx, |tx| Self::block_index_in(tx, file_id, block_id))
    }

    pub fn get_block(&self, ctx: &Context, file_id: i64, block_id: i64) -> Result<Block> {
        self.executor.with_tx(ctx, |tx| Self::get_block_in(tx, file_id, block_id))
    }

    /// Insert or update a block; returns the chain index it lives at
    pub fn upsert_block(
        &self,
        ctx: &Context,
        file_id: i64,
        block_id: i64,
        meta: BlockMeta,
        storage: BlockStorage,
    ) -> Result<u64> {
        self.executor
            .with_tx(ctx, |tx| Self::upsert_block_in(tx, file_id, block_id, meta, storage))
    }

    pub fn delete_block(&self, ctx: &Context, file_id: i64, block_id: i64) -> Result<()> {
        self.executor.with_tx(ctx, |tx| Self::delete_block_in(tx, file_id, block_id))
    }

    /// Remove the whole chain; returns how many blocks were removed
    pub fn delete_all_blocks(&self, ctx: &Context, file_id: i64) -> Result<usize> {
        self.executor.with_tx(ctx, |tx| Self::delete_all_blocks_in(tx, file_id))
    }

    pub fn truncate(&self, ctx: &Context, file_id: i64, new_size: i64) -> Result<()> {
        self.executor.with_tx(ctx, |tx| Self::truncate_in(tx, file_id, new_size))
    }

    // =========================================================================
    // Transaction-scoped operations
    // =========================================================================

    pub fn entries_in(tx: &TxScope, file_id: i64) -> Result<Vec<ChainEntry>> {
        ensure_id("file id", file_id)?;
        let prefix = keys::file_block_prefix(file_id);
        tx.scan_prefix(&prefix)?
            .into_iter()
            .map(|(key, value)| {
                Ok(ChainEntry {
                    index: keys::file_block_index(&prefix, &key)?,
                    entry: FileBlock::decode(&value)?,
                })
            })
            .collect()
    }

    pub fn scan_blocks_in(tx: &TxScope, file_id: i64) -> Result<Vec<Block>> {
        Ok(Self::resolve_in(tx, file_id)?
            .into_iter()
            .map(|(_, block)| block)
            .collect())
    }

    /// Chain entries paired with their resolved blocks
    fn resolve_in(tx: &TxScope, file_id: i64) -> Result<Vec<(ChainEntry, Block)>> {
        let entries = Self::entries_in(tx, file_id)?;
        let mut resolved = Vec::with_capacity(entries.len());
        for chain_entry in entries {
            let block_id = chain_entry.entry.block_id;
            let meta: BlockMeta = tx
                .get_opt(&keys::block_meta(block_id))?
                .ok_or_else(|| Self::unresolvable(file_id, &chain_entry, "meta"))?;
            let storage: BlockStorage = tx
                .get_opt(&keys::block_storage(block_id))?
                .ok_or_else(|| Self::unresolvable(file_id, &chain_entry, "storage"))?;
            resolved.push((chain_entry, Block::from_parts(meta, storage)));
        }
        Ok(resolved)
    }

    fn unresolvable(file_id: i64, chain_entry: &ChainEntry, part: &str) -> MetaError {
        tracing::warn!(
            file_id,
            index = chain_entry.index,
            block_id = chain_entry.entry.block_id,
            part,
            "chain entry cannot be resolved"
        );
        MetaError::Corrupted(format!(
            "file {} chain entry {} references block {} with no {}",
            file_id, chain_entry.index, chain_entry.entry.block_id, part
        ))
    }

    pub fn block_index_in(tx: &TxScope, file_id: i64, block_id: i64) -> Result<u64> {
        let entries = Self::entries_in(tx, file_id)?;
        Ok(entries
            .iter()
            .find(|e| e.entry.block_id == block_id)
            .map(|e| e.index)
            .unwrap_or_else(|| Self::append_index(&entries)))
    }

    fn append_index(entries: &[ChainEntry]) -> u64 {
        entries.last().map(|e| e.index + 1).unwrap_or(0)
    }

    pub fn get_block_in(tx: &TxScope, file_id: i64, block_id: i64) -> Result<Block> {
        Self::resolve_in(tx, file_id)?
            .into_iter()
            .map(|(_, block)| block)
            .find(|block| block.id == block_id)
            .ok_or_else(|| {
                MetaError::NotFound(format!("block {} is not in the chain of file {}", block_id, file_id))
            })
    }

    pub fn upsert_block_in(
        tx: &mut TxScope,
        file_id: i64,
        block_id: i64,
        mut meta: BlockMeta,
        storage: BlockStorage,
    ) -> Result<u64> {
        ensure_id("file id", file_id)?;
        ensure_id("block id", block_id)?;
        meta.id = block_id;
        meta.validate()?;

        let entries = Self::entries_in(tx, file_id)?;
        let (index, next_block_id, predecessor) =
            match entries.iter().position(|e| e.entry.block_id == block_id) {
                Some(pos) => (
                    entries[pos].index,
                    entries[pos].entry.next_block_id,
                    pos.checked_sub(1).map(|p| entries[p]),
                ),
                None => (Self::append_index(&entries), 0, entries.last().copied()),
            };

        if let Some(pred) = predecessor {
            if pred.entry.next_block_id != block_id {
                let relinked = FileBlock {
                    next_block_id: block_id,
                    ..pred.entry
                };
                tx.set(keys::file_block(file_id, pred.index), &relinked)?;
            }
        }

        let entry = FileBlock {
            block_id,
            number_bytes: meta.number_bytes,
            next_block_id,
        };
        tx.set(keys::file_block(file_id, index), &entry)?;
        tx.set(keys::block_meta(block_id), &meta)?;

        let storage_key = keys::block_storage(block_id);
        let mut replicas = tx
            .get_opt::<BlockStorage>(&storage_key)?
            .unwrap_or_else(|| BlockStorage::new(block_id));
        replicas.id = block_id;
        replicas.merge(storage);
        tx.set(storage_key, &replicas)?;

        tracing::debug!(file_id, block_id, index, "block upserted");
        Ok(index)
    }

    pub fn delete_block_in(tx: &mut TxScope, file_id: i64, block_id: i64) -> Result<()> {
        ensure_id("block id", block_id)?;
        let entries = Self::entries_in(tx, file_id)?;
        let chain_entry = entries
            .iter()
            .find(|e| e.entry.block_id == block_id)
            .ok_or_else(|| {
                MetaError::NotFound(format!("block {} is not in the chain of file {}", block_id, file_id))
            })?;

        if !chain_entry.entry.is_terminal() {
            tracing::warn!(file_id, block_id, index = chain_entry.index, "deleting a non-terminal block");
        }
        Self::remove_entry(tx, file_id, chain_entry)
    }

    pub fn delete_all_blocks_in(tx: &mut TxScope, file_id: i64) -> Result<usize> {
        let entries = Self::entries_in(tx, file_id)?;
        for chain_entry in &entries {
            Self::remove_entry(tx, file_id, chain_entry)?;
        }
        Ok(entries.len())
    }

    fn remove_entry(tx: &mut TxScope, file_id: i64, chain_entry: &ChainEntry) -> Result<()> {
        let block_id = chain_entry.entry.block_id;
        tx.delete(&keys::file_block(file_id, chain_entry.index))?;
        tx.delete(&keys::block_meta(block_id))?;
        tx.delete(&keys::block_storage(block_id))
    }

    /// Shrink the file to `new_size` bytes
    ///
    /// The block in which the new end falls becomes the last block, holding
    /// only the bytes before the new end; every block after it is removed.
    /// Growing a file is rejected.
    pub fn truncate_in(tx: &mut TxScope, file_id: i64, new_size: i64) -> Result<()> {
        if new_size < 0 {
            return Err(MetaError::invalid(format!("truncate size {} is negative", new_size)));
        }

        let chain = Self::resolve_in(tx, file_id)?;
        let total = chain.iter().try_fold(0i64, |acc, (_, block)| {
            acc.checked_add(block.number_bytes).ok_or_else(|| {
                MetaError::Corrupted(format!("file {} size overflows i64", file_id))
            })
        })?;
        if new_size > total {
            return Err(MetaError::invalid(format!(
                "cannot truncate file {} of {} bytes to {} bytes",
                file_id, total, new_size
            )));
        }

        if new_size == 0 {
            for (chain_entry, _) in &chain {
                Self::remove_entry(tx, file_id, chain_entry)?;
            }
            tracing::debug!(file_id, removed = chain.len(), "file truncated to zero");
            return Ok(());
        }

        // Every prefix sum is bounded by the checked total
        let mut cumulative = 0i64;
        let mut end = None;
        for (pos, (_, block)) in chain.iter().enumerate() {
            let before = cumulative;
            cumulative += block.number_bytes;
            if cumulative >= new_size {
                end = Some((pos, new_size - before));
                break;
            }
        }
        // new_size is within (0, total], so some block reaches it
        let (last_pos, residual) = end.ok_or_else(|| {
            MetaError::Corrupted(format!("file {} chain sizes do not add up", file_id))
        })?;

        for (chain_entry, _) in &chain[last_pos + 1..] {
            Self::remove_entry(tx, file_id, chain_entry)?;
        }

        let (last_entry, last_block) = &chain[last_pos];
        let terminal = FileBlock {
            block_id: last_block.id,
            number_bytes: residual,
            next_block_id: 0,
        };
        if terminal != last_entry.entry {
            tx.set(keys::file_block(file_id, last_entry.index), &terminal)?;
        }
        if last_block.number_bytes != residual {
            let (mut meta, _) = last_block.split();
            meta.number_bytes = residual;
            tx.set(keys::block_meta(last_block.id), &meta)?;
        }

        tracing::debug!(
            file_id,
            new_size,
            last_block = last_block.id,
            removed = chain.len() - last_pos - 1,
            "file truncated"
        );
        Ok(())
    }

    /// Replace the whole chain with `blocks`, linked in the given order
    pub fn replace_chain_in(tx: &mut TxScope, file_id: i64, blocks: &[Block]) -> Result<()> {
        let mut seen = HashSet::new();
        for block in blocks {
            ensure_id("block id", block.id)?;
            if !seen.insert(block.id) {
                return Err(MetaError::invalid(format!(
                    "block {} appears twice in file {}",
                    block.id, file_id
                )));
            }
        }

        Self::delete_all_blocks_in(tx, file_id)?;

        for (index, block) in blocks.iter().enumerate() {
            let (meta, storage) = block.split();
            meta.validate()?;
            let entry = FileBlock {
                block_id: block.id,
                number_bytes: block.number_bytes,
                next_block_id: blocks.get(index + 1).map(|b| b.id).unwrap_or(0),
            };
            tx.set(keys::file_block(file_id, index as u64), &entry)?;
            tx.set(keys::block_meta(block.id), &meta)?;
            tx.set(keys::block_storage(block.id), &storage)?;
        }
        Ok(())
    }
}
