use super::Storage;
use crate::ingest::block::{Block, TxResult};
use anyhow::Result;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
struct MemoryInner {
    blocks: BTreeMap<u64, Block>,
    txs: BTreeMap<(u64, u32), TxResult>,
    tx_index: HashMap<String, (u64, u32)>,
}

impl MemoryInner {
    fn txs_at(&self, height: u64) -> impl Iterator<Item = &TxResult> {
        self.txs
            .range((height, 0)..=(height, u32::MAX))
            .map(|(_, tx)| tx)
    }

    fn is_complete(&self, block: &Block) -> bool {
        self.txs_at(block.height).count() == block.num_txs()
    }
}

/// In-process store keeping every committed block and transaction.
///
/// Write counters include repeated writes so callers can observe retries.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    inner: RwLock<MemoryInner>,
    block_writes: AtomicU64,
    tx_writes: AtomicU64,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest height whose block and every one of its txs are stored.
    ///
    /// A block whose txs were only partly written does not count, so a
    /// restart rewrites that height.
    pub fn latest_height(&self) -> Option<u64> {
        let inner = self.inner.read();
        inner
            .blocks
            .values()
            .rev()
            .find(|block| inner.is_complete(block))
            .map(|block| block.height)
    }

    pub fn heights(&self) -> Vec<u64> {
        self.inner.read().blocks.keys().copied().collect()
    }

    pub fn block(&self, height: u64) -> Option<Block> {
        self.inner.read().blocks.get(&height).cloned()
    }

    pub fn txs_at(&self, height: u64) -> Vec<TxResult> {
        self.inner.read().txs_at(height).cloned().collect()
    }

    pub fn tx_by_hash(&self, hash: &str) -> Option<TxResult> {
        let inner = self.inner.read();
        let key = inner.tx_index.get(hash)?;
        inner.txs.get(key).cloned()
    }

    pub fn tx_count(&self) -> usize {
        self.inner.read().txs.len()
    }

    pub fn block_writes(&self) -> u64 {
        self.block_writes.load(Ordering::Relaxed)
    }

    pub fn tx_writes(&self) -> u64 {
        self.tx_writes.load(Ordering::Relaxed)
    }

    pub fn insert_block(&self, block: Block) {
        self.block_writes.fetch_add(1, Ordering::Relaxed);
        self.inner.write().blocks.insert(block.height, block);
    }

    pub fn insert_tx(&self, tx: TxResult) {
        self.tx_writes.fetch_add(1, Ordering::Relaxed);
        let key = (tx.height, tx.index);
        let mut inner = self.inner.write();
        inner.tx_index.insert(tx.hash.clone(), key);
        inner.txs.insert(key, tx);
    }
}

impl Storage for MemoryStorage {
    fn get_latest_height(&self) -> BoxFuture<'_, Result<Option<u64>>> {
        Box::pin(async move { Ok(self.latest_height()) })
    }

    fn save_block<'a>(&'a self, block: &'a Block) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.insert_block(block.clone());
            Ok(())
        })
    }

    fn save_tx<'a>(&'a self, tx: &'a TxResult) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.insert_tx(tx.clone());
            Ok(())
        })
    }
}
