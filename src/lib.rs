//! # nsmeta
//!
//! Namespace metadata service for a hierarchical filesystem:
//! - Directory tree, file records and block replica locations in a flat,
//!   transactional key-value space
//! - Per-file block chains kept as index-addressed linked entries
//! - Atomic multi-key tree operations (link, unlink, move, recursive delete)
//! - HTTP API for namenode-style callers
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        HTTP API                              │
//! │              (axum, one blocking worker/request)             │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                   Metadata Service                           │
//! │                (lifecycle gate, oracle)                      │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │  Namespace  │          │ Block Chain │
//!   │   (tree)    │          │  (blocks)   │
//!   └──────┬──────┘          └──────┬──────┘
//!          └────────────┬───────────┘
//!                       ▼
//!               ┌───────────────┐
//!               │   Executor    │  key codec + records
//!               └───────┬───────┘
//!                       ▼
//!               ┌───────────────┐
//!               │   KV Store    │  MVCC memory store + WAL
//!               └───────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;
pub mod context;
pub mod lifecycle;
pub mod logging;

pub mod keys;
pub mod model;
pub mod record;
pub mod kv;
pub mod txn;

pub mod chain;
pub mod namespace;
pub mod service;
pub mod api;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{ErrorKind, MetaError, Result};
pub use config::Config;
pub use context::Context;
pub use kv::MemoryStore;
pub use service::MetaService;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of nsmeta
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
