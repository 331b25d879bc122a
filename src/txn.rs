//! Transaction Executor
//!
//! Every logical operation runs inside exactly one [`TxScope`]. Either the
//! closure passed to [`Executor::with_tx`] succeeds and the scope commits, or
//! the scope is rolled back and the error is returned unchanged.
//!
//! Each store round trip checks the request [`Context`] first, so a
//! cancelled request stops at the next read or write.

use std::sync::Arc;

use crate::context::Context;
use crate::error::{MetaError, Result};
use crate::keys;
use crate::kv::{Storage, Transaction};
use crate::record::Record;

/// Opens transaction scopes against a shared store
#[derive(Clone)]
pub struct Executor {
    store: Arc<dyn Storage>,
}

impl Executor {
    pub fn new(store: Arc<dyn Storage>) -> Self {
        Self { store }
    }

    /// Open a caller-managed scope
    ///
    /// The scope rolls back on drop unless [`TxScope::commit`] was called.
    pub fn begin(&self, ctx: &Context) -> Result<TxScope> {
        ctx.check()?;
        let tx = self.store.begin()?;
        Ok(TxScope {
            tx,
            ctx: ctx.clone(),
            finished: false,
        })
    }

    /// Run `f` in a fresh transaction: commit on success, roll back on error
    pub fn with_tx<T, F>(&self, ctx: &Context, f: F) -> Result<T>
    where
        F: FnOnce(&mut TxScope) -> Result<T>,
    {
        let mut scope = self.begin(ctx)?;
        match f(&mut scope) {
            Ok(value) => {
                scope.commit()?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = scope.rollback() {
                    tracing::warn!(error = %rollback_err, "rollback failed");
                }
                Err(e)
            }
        }
    }
}

/// An open transaction bound to one request context
pub struct TxScope {
    tx: Box<dyn Transaction>,
    ctx: Context,
    finished: bool,
}

impl TxScope {
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Load a record; `NotFound` when the key is absent
    pub fn get<R: Record>(&self, key: &[u8]) -> Result<R> {
        self.get_opt(key)?
            .ok_or_else(|| MetaError::NotFound(keys::describe(key)))
    }

    /// Load a record if present
    pub fn get_opt<R: Record>(&self, key: &[u8]) -> Result<Option<R>> {
        self.ctx.check()?;
        match self.tx.get(key)? {
            Some(bytes) => R::decode(&bytes).map(Some),
            None => Ok(None),
        }
    }

    pub fn exists(&self, key: &[u8]) -> Result<bool> {
        self.ctx.check()?;
        Ok(self.tx.get(key)?.is_some())
    }

    pub fn set<R: Record>(&mut self, key: Vec<u8>, value: &R) -> Result<()> {
        self.ctx.check()?;
        let bytes = value.encode()?;
        self.tx.set(key, bytes)
    }

    pub fn delete(&mut self, key: &[u8]) -> Result<()> {
        self.ctx.check()?;
        self.tx.delete(key)
    }

    /// Every (key, value) whose key starts with `prefix`, in key order
    ///
    /// Membership is re-checked per entry; the store's end bound is only a
    /// hint.
    pub fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.ctx.check()?;
        let end = keys::prefix_end(prefix);
        let mut cursor = self.tx.iter(prefix, end.as_deref())?;

        let mut entries = Vec::new();
        while cursor.valid() {
            self.ctx.check()?;
            let key = cursor.key();
            if !key.starts_with(prefix) {
                break;
            }
            entries.push((key.to_vec(), cursor.value().to_vec()));
            cursor.next()?;
        }
        Ok(entries)
    }

    /// Publish the scope's writes
    ///
    /// A context that fired before commit aborts the transaction instead.
    pub fn commit(mut self) -> Result<()> {
        self.finished = true;
        if let Err(e) = self.ctx.check() {
            self.tx.rollback()?;
            return Err(e);
        }
        self.tx.commit()
    }

    pub fn rollback(mut self) -> Result<()> {
        self.finished = true;
        self.tx.rollback()
    }
}

impl Drop for TxScope {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.tx.rollback() {
                tracing::warn!(error = %e, "rollback on drop failed");
            }
        }
    }
}
