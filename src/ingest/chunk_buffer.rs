use super::chunk::CompletedChunk;
use std::collections::BTreeMap;
use tokio::sync::{Mutex, Notify};

struct BufferState {
    next_commit: u64,
    chunks: BTreeMap<u64, CompletedChunk>,
}

/// Async buffer of completed chunks that only releases them in commit order.
///
/// `push` applies admission control: once `max_chunks` chunks are buffered,
/// producers wait for room unless their chunk starts at `next_commit`.
pub struct ChunkBuffer {
    state: Mutex<BufferState>,
    notify: Notify,
    max_chunks: usize,
}

impl ChunkBuffer {
    pub fn new(next_commit: u64, max_chunks: usize) -> Self {
        assert!(max_chunks > 0, "max_chunks must be greater than zero");
        Self {
            state: Mutex::new(BufferState {
                next_commit,
                chunks: BTreeMap::new(),
            }),
            notify: Notify::new(),
            max_chunks,
        }
    }

    pub async fn push(&self, chunk: CompletedChunk) {
        let start = chunk.start();
        loop {
            let notified = self.notify.notified();
            let mut state = self.state.lock().await;

            if start < state.next_commit {
                tracing::warn!(
                    start,
                    next_commit = state.next_commit,
                    "dropping chunk below the commit point"
                );
                return;
            }

            let has_room = state.chunks.len() < self.max_chunks;
            if has_room || start == state.next_commit {
                if state.chunks.insert(start, chunk).is_some() {
                    tracing::warn!(start, "replaced a buffered chunk with the same start");
                }
                drop(state);
                self.notify.notify_waiters();
                return;
            }

            drop(state);
            notified.await;
        }
    }

    pub async fn pop_next(&self) -> CompletedChunk {
        loop {
            let notified = self.notify.notified();
            if let Some(chunk) = self.try_pop_next().await {
                self.notify.notify_waiters();
                return chunk;
            }
            notified.await;
        }
    }

    pub async fn try_pop_next(&self) -> Option<CompletedChunk> {
        let mut state = self.state.lock().await;
        let next = state.next_commit;
        let chunk = state.chunks.remove(&next)?;
        state.next_commit = chunk.range().end().saturating_add(1);
        Some(chunk)
    }

    /// Drops every buffered chunk and returns how many were discarded.
    pub async fn clear(&self) -> usize {
        let mut state = self.state.lock().await;
        let dropped = state.chunks.len();
        state.chunks.clear();
        drop(state);
        self.notify.notify_waiters();
        dropped
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.chunks.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.chunks.is_empty()
    }

    pub async fn next_commit(&self) -> u64 {
        self.state.lock().await.next_commit
    }

    pub fn max_chunks(&self) -> usize {
        self.max_chunks
    }
}
