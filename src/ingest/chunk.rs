use super::block::FetchedBlock;
use anyhow::{bail, Result};
use std::fmt;
use std::ops::RangeInclusive;

/// Inclusive range of heights fetched as one unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkRange {
    start: u64,
    end: u64,
}

impl ChunkRange {
    pub fn new(start: u64, end: u64) -> Self {
        assert!(start <= end, "chunk start {start} must not exceed end {end}");
        Self { start, end }
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    /// Number of heights in the range. Always at least one.
    pub fn size(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn heights(&self) -> RangeInclusive<u64> {
        self.start..=self.end
    }
}

impl fmt::Display for ChunkRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

/// A chunk whose every height has been fetched.
#[derive(Debug, Clone)]
pub struct CompletedChunk {
    range: ChunkRange,
    blocks: Vec<FetchedBlock>,
}

impl CompletedChunk {
    /// Fails unless `blocks` holds exactly one block per height of `range`,
    /// in ascending order.
    pub fn new(range: ChunkRange, blocks: Vec<FetchedBlock>) -> Result<Self> {
        if blocks.len() as u64 != range.size() {
            bail!(
                "chunk {range} expects {} blocks, got {}",
                range.size(),
                blocks.len()
            );
        }

        for (expected, block) in range.heights().zip(&blocks) {
            if block.height() != expected {
                bail!(
                    "chunk {range} holds height {} where {expected} was expected",
                    block.height()
                );
            }
        }

        Ok(Self { range, blocks })
    }

    pub fn range(&self) -> ChunkRange {
        self.range
    }

    pub fn start(&self) -> u64 {
        self.range.start
    }

    pub fn blocks(&self) -> &[FetchedBlock] {
        &self.blocks
    }

    pub fn tx_count(&self) -> usize {
        self.blocks.iter().map(|block| block.txs().len()).sum()
    }

    pub fn into_blocks(self) -> Vec<FetchedBlock> {
        self.blocks
    }
}
