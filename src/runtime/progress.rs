use std::sync::atomic::{AtomicU64, Ordering};

const UNINITIALIZED: u64 = u64::MAX;

/// Tracks the last durably committed height in memory.
#[derive(Debug)]
pub struct ProgressTracker {
    last_committed: AtomicU64,
}

impl ProgressTracker {
    pub fn new(last_committed: Option<u64>) -> Self {
        Self {
            last_committed: AtomicU64::new(last_committed.unwrap_or(UNINITIALIZED)),
        }
    }

    pub fn reset(&self, last_committed: Option<u64>) {
        self.last_committed
            .store(last_committed.unwrap_or(UNINITIALIZED), Ordering::SeqCst);
    }

    pub fn mark_committed(&self, height: u64) {
        self.last_committed.store(height, Ordering::SeqCst);
    }

    pub fn last_committed(&self) -> Option<u64> {
        match self.last_committed.load(Ordering::SeqCst) {
            UNINITIALIZED => None,
            value => Some(value),
        }
    }
}
