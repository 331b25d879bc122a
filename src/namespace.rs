//! Namespace Tree Manager
//!
//! The directory tree is stored as two kinds of records:
//!
//! ```text
//!   inode(id)                     -> INode { parent_id, name, .. }
//!   directory-child(parent, name) -> ChildLink { id }
//! ```
//!
//! A link `(parent, name) -> id` exists exactly when `inode(id)` names that
//! parent and that name. Every operation here writes both sides in the same
//! transaction. Listing a directory is a prefix scan over its links, so
//! children come back in name byte order.

use std::collections::HashSet;

use crate::chain::BlockChain;
use crate::context::Context;
use crate::error::{ensure_id, MetaError, Result};
use crate::keys;
use crate::model::{ChildLink, INode, INodeKind};
use crate::record::Record;
use crate::txn::{Executor, TxScope};

/// Maintains inode records and their parent links
#[derive(Clone)]
pub struct Namespace {
    executor: Executor,
}

impl Namespace {
    pub fn new(executor: Executor) -> Self {
        Self { executor }
    }

    // =========================================================================
    // Self-contained operations (one transaction each)
    // =========================================================================

    pub fn get_inode(&self, ctx: &Context, id: i64) -> Result<INode> {
        self.executor.with_tx(ctx, |tx| Self::get_inode_in(tx, id))
    }

    /// Write `node` and its parent link
    pub fn create_or_replace(&self, ctx: &Context, node: &INode) -> Result<()> {
        self.executor.with_tx(ctx, |tx| Self::create_or_replace_in(tx, node))
    }

    pub fn get_child(&self, ctx: &Context, parent_id: i64, name: &str, with_details: bool) -> Result<INode> {
        self.executor
            .with_tx(ctx, |tx| Self::get_child_in(tx, parent_id, name, with_details))
    }

    pub fn list_children(&self, ctx: &Context, parent_id: i64, simple: bool) -> Result<Vec<INode>> {
        self.executor
            .with_tx(ctx, |tx| Self::list_children_in(tx, parent_id, simple))
    }

    pub fn delete_child(&self, ctx: &Context, parent_id: i64, name: &str) -> Result<()> {
        self.executor.with_tx(ctx, |tx| Self::delete_child_in(tx, parent_id, name))
    }

    pub fn delete_file(&self, ctx: &Context, id: i64) -> Result<()> {
        self.executor.with_tx(ctx, |tx| Self::delete_file_in(tx, id))
    }

    /// Delete a directory and everything reachable below it; returns the
    /// number of inodes removed
    pub fn delete_directory(&self, ctx: &Context, id: i64) -> Result<usize> {
        self.executor.with_tx(ctx, |tx| Self::delete_directory_in(tx, id))
    }

    pub fn reparent(&self, ctx: &Context, id: i64, old_parent: i64, new_parent: i64) -> Result<()> {
        self.executor
            .with_tx(ctx, |tx| Self::reparent_in(tx, id, old_parent, new_parent))
    }

    // =========================================================================
    // Transaction-scoped operations
    // =========================================================================

    pub fn get_inode_in(tx: &TxScope, id: i64) -> Result<INode> {
        ensure_id("inode id", id)?;
        tx.get(&keys::inode(id))
    }

    pub fn create_or_replace_in(tx: &mut TxScope, node: &INode) -> Result<()> {
        ensure_id("inode id", node.id)?;
        ensure_id("parent id", node.parent_id)?;
        if node.name.is_empty() {
            return Err(MetaError::invalid(format!("inode {} has an empty name", node.id)));
        }
        if node.id == node.parent_id {
            return Err(MetaError::invalid(format!("inode {} cannot be its own parent", node.id)));
        }

        if let Some(existing) = tx.get_opt::<INode>(&keys::inode(node.id))? {
            if existing.kind != node.kind {
                return Err(MetaError::invalid(format!(
                    "inode {} cannot change type from {:?} to {:?}",
                    node.id, existing.kind, node.kind
                )));
            }
            if existing.parent_id != node.parent_id || existing.name != node.name {
                Self::unlink_own(tx, &existing)?;
            }
        }

        let link_key = keys::directory_child(node.parent_id, &node.name);
        if let Some(link) = tx.get_opt::<ChildLink>(&link_key)? {
            if link.id != node.id {
                return Err(MetaError::invalid(format!(
                    "{:?} in directory {} is already linked to inode {}",
                    node.name, node.parent_id, link.id
                )));
            }
        }

        Self::touch_parent(tx, node.parent_id)?;
        tx.set(keys::inode(node.id), node)?;
        tx.set(link_key, &ChildLink { id: node.id })?;
        tracing::debug!(id = node.id, parent_id = node.parent_id, name = %node.name, "inode written");
        Ok(())
    }

    /// Rewrite the parent's record unchanged so a concurrent delete of the
    /// parent conflicts with this transaction
    fn touch_parent(tx: &mut TxScope, parent_id: i64) -> Result<()> {
        if let Some(parent) = tx.get_opt::<INode>(&keys::inode(parent_id))? {
            tx.set(keys::inode(parent_id), &parent)?;
        }
        Ok(())
    }

    /// Remove the link naming `node` under its parent, if it still points at it
    fn unlink_own(tx: &mut TxScope, node: &INode) -> Result<()> {
        if node.parent_id <= 0 || node.name.is_empty() {
            return Ok(());
        }
        let key = keys::directory_child(node.parent_id, &node.name);
        match tx.get_opt::<ChildLink>(&key)? {
            Some(link) if link.id == node.id => tx.delete(&key),
            _ => Ok(()),
        }
    }

    pub fn get_child_in(tx: &TxScope, parent_id: i64, name: &str, with_details: bool) -> Result<INode> {
        ensure_id("parent id", parent_id)?;
        if name.is_empty() {
            return Err(MetaError::invalid("child name must not be empty"));
        }

        let link: ChildLink = tx.get(&keys::directory_child(parent_id, name))?;
        if !with_details {
            return Ok(INode {
                id: link.id,
                name: name.to_string(),
                ..Default::default()
            });
        }
        Self::resolve_child(tx, parent_id, name, link.id).map(|node| node.summary())
    }

    fn resolve_child(tx: &TxScope, parent_id: i64, name: &str, child_id: i64) -> Result<INode> {
        match tx.get_opt::<INode>(&keys::inode(child_id))? {
            Some(node) => Ok(node),
            None => {
                tracing::warn!(parent_id, name, child_id, "dangling directory-child link");
                Err(MetaError::NotFound(format!(
                    "{:?} in directory {} links to missing inode {}",
                    name, parent_id, child_id
                )))
            }
        }
    }

    pub fn list_children_in(tx: &TxScope, parent_id: i64, simple: bool) -> Result<Vec<INode>> {
        ensure_id("parent id", parent_id)?;
        let prefix = keys::directory_child_prefix(parent_id);

        let mut children = Vec::new();
        for (key, value) in tx.scan_prefix(&prefix)? {
            let name = keys::child_name(&prefix, &key)?;
            let link = ChildLink::decode(&value)?;
            let child = if simple {
                INode {
                    id: link.id,
                    name,
                    ..Default::default()
                }
            } else {
                let node = Self::resolve_child(tx, parent_id, &name, link.id)?;
                INode { name, ..node.summary() }
            };
            children.push(child);
        }
        Ok(children)
    }

    /// Remove the link only; the inode it pointed at is left in place
    pub fn delete_child_in(tx: &mut TxScope, parent_id: i64, name: &str) -> Result<()> {
        ensure_id("parent id", parent_id)?;
        if name.is_empty() {
            return Err(MetaError::invalid("child name must not be empty"));
        }
        tx.delete(&keys::directory_child(parent_id, name))
    }

    pub fn delete_file_in(tx: &mut TxScope, id: i64) -> Result<()> {
        let node = Self::get_inode_in(tx, id)?;
        match node.kind {
            INodeKind::File => {}
            INodeKind::Directory => {
                return Err(MetaError::invalid(format!("inode {} is a directory", id)));
            }
        }

        let blocks = BlockChain::delete_all_blocks_in(tx, id)?;
        tx.delete(&keys::inode(id))?;
        Self::unlink_own(tx, &node)?;
        tracing::debug!(id, blocks, "file deleted");
        Ok(())
    }

    pub fn delete_directory_in(tx: &mut TxScope, id: i64) -> Result<usize> {
        let root = Self::get_inode_in(tx, id)?;
        match root.kind {
            INodeKind::Directory => {}
            INodeKind::File => {
                return Err(MetaError::invalid(format!("inode {} is a file", id)));
            }
        }

        let mut visited = HashSet::new();
        let mut pending = vec![id];
        let mut removed = 0;

        while let Some(dir_id) = pending.pop() {
            if !visited.insert(dir_id) {
                tracing::warn!(dir_id, root = id, "directory reached twice during delete");
                continue;
            }

            let prefix = keys::directory_child_prefix(dir_id);
            for (key, value) in tx.scan_prefix(&prefix)? {
                let link = ChildLink::decode(&value)?;
                match tx.get_opt::<INode>(&keys::inode(link.id))? {
                    Some(child) => match child.kind {
                        INodeKind::File => {
                            BlockChain::delete_all_blocks_in(tx, child.id)?;
                            tx.delete(&keys::inode(child.id))?;
                            removed += 1;
                        }
                        INodeKind::Directory => {
                            if !visited.contains(&child.id) {
                                pending.push(child.id);
                                tx.delete(&keys::inode(child.id))?;
                                removed += 1;
                            }
                        }
                    },
                    None => {
                        tracing::warn!(parent_id = dir_id, child_id = link.id, "dropping dangling link");
                    }
                }
                tx.delete(&key)?;
            }
        }

        tx.delete(&keys::inode(id))?;
        Self::unlink_own(tx, &root)?;
        removed += 1;

        tracing::debug!(id, removed, "directory deleted");
        Ok(removed)
    }

    pub fn reparent_in(tx: &mut TxScope, id: i64, old_parent: i64, new_parent: i64) -> Result<()> {
        ensure_id("inode id", id)?;
        ensure_id("old parent id", old_parent)?;
        ensure_id("new parent id", new_parent)?;

        let mut node = Self::get_inode_in(tx, id)?;
        let old_key = keys::directory_child(old_parent, &node.name);
        let old_link: ChildLink = tx.get(&old_key)?;
        if old_link.id != id {
            return Err(MetaError::invalid(format!(
                "{:?} in directory {} is linked to inode {}, not {}",
                node.name, old_parent, old_link.id, id
            )));
        }

        let target = Self::get_inode_in(tx, new_parent)?;
        match target.kind {
            INodeKind::Directory => {}
            INodeKind::File => {
                return Err(MetaError::invalid(format!("new parent {} is a file", new_parent)));
            }
        }
        if old_parent == new_parent {
            return Ok(());
        }
        Self::ensure_not_ancestor(tx, id, &target)?;

        let new_key = keys::directory_child(new_parent, &node.name);
        if let Some(existing) = tx.get_opt::<ChildLink>(&new_key)? {
            if existing.id != id {
                return Err(MetaError::invalid(format!(
                    "{:?} in directory {} is already linked to inode {}",
                    node.name, new_parent, existing.id
                )));
            }
        }

        node.parent_id = new_parent;
        tx.set(keys::inode(new_parent), &target)?;
        tx.set(keys::inode(id), &node)?;
        tx.delete(&old_key)?;
        tx.set(new_key, &ChildLink { id })?;

        tracing::debug!(id, old_parent, new_parent, "inode reparented");
        Ok(())
    }

    /// Reject moving `id` underneath itself
    fn ensure_not_ancestor(tx: &TxScope, id: i64, target: &INode) -> Result<()> {
        let mut seen = HashSet::new();
        let mut current = target.clone();
        loop {
            if current.id == id {
                return Err(MetaError::invalid(format!(
                    "inode {} cannot be moved below itself",
                    id
                )));
            }
            if current.parent_id <= 0 || !seen.insert(current.id) {
                return Ok(());
            }
            match tx.get_opt::<INode>(&keys::inode(current.parent_id))? {
                Some(parent) => current = parent,
                None => return Ok(()),
            }
        }
    }
}
