use crate::ingest::chunk::{ChunkRange, CompletedChunk};
use crate::ingest::chunk_buffer::ChunkBuffer;
use crate::ingest::planner::ChunkPlanner;
use crate::rpc::Client;
use crate::runtime::telemetry::Telemetry;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use super::shared::WorkerShared;
use super::types::{ChunkOutcome, FetchRetryPolicy};

/// One fetch slot: claims a chunk, fetches every height of it and hands the
/// completed chunk to the sequencer buffer.
pub struct Worker {
    pub id: usize,
    pub(super) planner: Arc<ChunkPlanner>,
    pub(super) buffer: Arc<ChunkBuffer>,
    pub(super) client: Arc<dyn Client>,
    pub(super) telemetry: Arc<Telemetry>,
    pub(super) retry: FetchRetryPolicy,
    pub(super) idle_backoff: Duration,
    pub(super) shutdown: CancellationToken,
}

impl Worker {
    pub fn new(id: usize, shared: WorkerShared, shutdown: CancellationToken) -> Self {
        let WorkerShared {
            planner,
            buffer,
            client,
            telemetry,
            retry,
            idle_backoff,
        } = shared;

        Self {
            id,
            planner,
            buffer,
            client,
            telemetry,
            retry,
            idle_backoff,
            shutdown,
        }
    }

    #[tracing::instrument(name = "worker", skip_all, fields(worker = self.id))]
    pub async fn run(self) -> Result<()> {
        tracing::info!(worker = self.id, "worker task started");

        loop {
            if self.shutdown.is_cancelled() {
                tracing::info!(worker = self.id, "shutdown requested; exiting worker loop");
                break;
            }

            let Some(range) = self.planner.next_chunk() else {
                if !self.idle().await {
                    break;
                }
                continue;
            };

            tracing::debug!(
                worker = self.id,
                start = range.start(),
                end = range.end(),
                "claimed chunk"
            );

            match self.fetch_chunk(range).await? {
                ChunkOutcome::Fetched(chunk) => {
                    if !self.submit(chunk).await {
                        self.planner.release_chunk(range);
                        tracing::info!(
                            worker = self.id,
                            start = range.start(),
                            end = range.end(),
                            "shutdown while waiting for buffer room; chunk released"
                        );
                        break;
                    }
                }
                ChunkOutcome::Failed { attempts, error } => {
                    tracing::warn!(
                        worker = self.id,
                        start = range.start(),
                        end = range.end(),
                        attempts,
                        error = %error,
                        "chunk fetch failed; releasing for reissue"
                    );
                    self.release_failed(range);
                }
                ChunkOutcome::HeadReached { missing_height } => {
                    let available = missing_height.saturating_sub(1);
                    tracing::info!(
                        worker = self.id,
                        start = range.start(),
                        end = range.end(),
                        missing_height,
                        available,
                        "node is behind the planned head; releasing chunk"
                    );
                    self.planner.observe_head(available);
                    self.release_failed(range);
                }
                ChunkOutcome::Cancelled => {
                    self.planner.release_chunk(range);
                    tracing::info!(
                        worker = self.id,
                        start = range.start(),
                        end = range.end(),
                        "shutdown requested mid-fetch; chunk released"
                    );
                    break;
                }
            }
        }

        tracing::info!(worker = self.id, "worker task exited");
        Ok(())
    }

    /// Waits out `idle_backoff`. Returns `false` when shutdown fired first.
    async fn idle(&self) -> bool {
        tracing::trace!(worker = self.id, "no chunk available; idling");
        tokio::select! {
            _ = self.shutdown.cancelled() => false,
            _ = sleep(self.idle_backoff) => true,
        }
    }

    /// Hands the chunk to the buffer. Returns `false` when shutdown fired
    /// while waiting for room.
    async fn submit(&self, chunk: CompletedChunk) -> bool {
        let range = chunk.range();
        let txs = chunk.tx_count();

        tokio::select! {
            _ = self.shutdown.cancelled() => return false,
            _ = self.buffer.push(chunk) => {}
        }

        self.planner.complete_chunk(range);
        self.telemetry.record_fetched_chunk();
        tracing::debug!(
            worker = self.id,
            start = range.start(),
            end = range.end(),
            txs,
            "chunk submitted to sequencer"
        );
        true
    }

    fn release_failed(&self, range: ChunkRange) {
        if self.planner.release_chunk(range) {
            self.telemetry.record_released_chunk();
        }
    }
}
