//! Persistence contract for committed blocks and transactions.
//!
//! The sequencer is the only writer and always writes in ascending height
//! order: `save_block` for a height, then `save_tx` for each of its
//! transactions. Both writes may be repeated for the same height when a
//! previous attempt failed, so implementations must treat them as upserts.

pub mod memory;

use crate::ingest::block::{Block, TxResult};
use anyhow::Result;
use futures::future::BoxFuture;
use std::fmt;

pub use memory::MemoryStorage;

/// Height the pipeline assumes for a store that has never committed anything.
/// Ingestion starts one above it.
pub const EMPTY_STORE_HEIGHT: u64 = 0;

pub trait Storage: Send + Sync {
    /// Highest height whose block and all of its txs are stored, or `None`
    /// when no height is complete.
    ///
    /// A block saved without all of its txs must not be reported, otherwise
    /// a restart after a failed `save_tx` would skip that height.
    fn get_latest_height(&self) -> BoxFuture<'_, Result<Option<u64>>>;

    fn save_block<'a>(&'a self, block: &'a Block) -> BoxFuture<'a, Result<()>>;

    fn save_tx<'a>(&'a self, tx: &'a TxResult) -> BoxFuture<'a, Result<()>>;
}

/// Resolves the first height to ingest from a store's latest height.
pub fn resume_height(latest: Option<u64>) -> u64 {
    latest.unwrap_or(EMPTY_STORE_HEIGHT).saturating_add(1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageOp {
    SaveBlock,
    SaveTx { index: u32 },
}

impl fmt::Display for StorageOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageOp::SaveBlock => write!(f, "save_block"),
            StorageOp::SaveTx { index } => write!(f, "save_tx (index {index})"),
        }
    }
}

/// A height that could not be written after every retry was spent.
///
/// The failed write and the storage's own error follow as the source.
#[derive(Debug)]
pub struct StorageError {
    pub op: StorageOp,
    pub height: u64,
    pub attempts: usize,
    pub source: anyhow::Error,
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "height {} not stored after {} attempt(s)",
            self.height, self.attempts
        )
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}
