//! Chunk planning for the fetch workers.
//!
//! The planner hands out disjoint, contiguous height ranges above the last
//! persisted height. Ranges that a worker gives up on are queued for reissue
//! and always handed out before fresh work so the sequencer is never starved
//! of the height it waits for.

use super::chunk::ChunkRange;
use parking_lot::Mutex;
use std::collections::BTreeMap;

#[derive(Debug)]
struct PlannerState {
    head: Option<u64>,
    /// Latest observation below `head`, while the regression lasts.
    regressed_to: Option<u64>,
    cursor: u64,
    claimed: BTreeMap<u64, ChunkRange>,
    released: BTreeMap<u64, ChunkRange>,
}

#[derive(Debug)]
pub struct ChunkPlanner {
    state: Mutex<PlannerState>,
    max_chunk_size: u64,
}

impl ChunkPlanner {
    pub fn new(last_persisted: u64, max_chunk_size: u64) -> Self {
        assert!(max_chunk_size > 0, "max_chunk_size must be greater than zero");
        Self {
            state: Mutex::new(PlannerState {
                head: None,
                regressed_to: None,
                cursor: last_persisted.saturating_add(1),
                claimed: BTreeMap::new(),
                released: BTreeMap::new(),
            }),
            max_chunk_size,
        }
    }

    /// Records a chain head observation. Returns `true` when the observation
    /// is below the known head.
    ///
    /// A lower head is treated as transient: the known head and the cursor are
    /// kept, and only released ranges at or below the lower observation are
    /// issued until an observation catches up again.
    pub fn observe_head(&self, head: u64) -> bool {
        let mut state = self.state.lock();
        match state.head {
            Some(known) if head < known => {
                if state.regressed_to.is_none() {
                    tracing::debug!(known, observed = head, "chain head regressed; pausing chunk issue");
                }
                state.regressed_to = Some(head);
                true
            }
            _ => {
                if state.regressed_to.is_some() {
                    tracing::debug!(head, "chain head recovered; resuming chunk issue");
                }
                state.head = Some(head);
                state.regressed_to = None;
                false
            }
        }
    }

    /// Claims the next range to fetch, or `None` when there is no work.
    pub fn next_chunk(&self) -> Option<ChunkRange> {
        let mut state = self.state.lock();
        if let Some(lowest) = state.released.first_key_value().map(|(_, range)| *range) {
            let servable = state
                .regressed_to
                .map_or(true, |available| lowest.end() <= available);
            if servable {
                state.released.remove(&lowest.start());
                state.claimed.insert(lowest.start(), lowest);
                return Some(lowest);
            }
        }

        if state.regressed_to.is_some() {
            return None;
        }

        let head = state.head?;
        if state.cursor > head {
            return None;
        }

        let start = state.cursor;
        let end = start.saturating_add(self.max_chunk_size - 1).min(head);
        let range = ChunkRange::new(start, end);
        state.cursor = end.saturating_add(1);
        state.claimed.insert(start, range);
        Some(range)
    }

    /// Returns a claimed range to the planner for reissue.
    pub fn release_chunk(&self, range: ChunkRange) -> bool {
        let mut state = self.state.lock();
        if state.claimed.get(&range.start()) != Some(&range) {
            tracing::warn!(start = range.start(), end = range.end(), "ignoring release of unclaimed chunk");
            return false;
        }
        state.claimed.remove(&range.start());
        state.released.insert(range.start(), range);
        true
    }

    /// Clears the claim on a range the sequencer has accepted.
    pub fn complete_chunk(&self, range: ChunkRange) -> bool {
        let mut state = self.state.lock();
        if state.claimed.get(&range.start()) != Some(&range) {
            tracing::warn!(start = range.start(), end = range.end(), "ignoring completion of unclaimed chunk");
            return false;
        }
        state.claimed.remove(&range.start());
        true
    }

    pub fn cursor(&self) -> u64 {
        self.state.lock().cursor
    }

    pub fn head(&self) -> Option<u64> {
        self.state.lock().head
    }

    pub fn head_regressed(&self) -> bool {
        self.state.lock().regressed_to.is_some()
    }

    pub fn claimed(&self) -> Vec<ChunkRange> {
        self.state.lock().claimed.values().copied().collect()
    }

    pub fn released(&self) -> Vec<ChunkRange> {
        self.state.lock().released.values().copied().collect()
    }

    pub fn max_chunk_size(&self) -> u64 {
        self.max_chunk_size
    }
}
