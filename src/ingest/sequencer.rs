//! Ordered commit stage.
//!
//! The sequencer is the only component that writes to storage. It takes
//! completed chunks from the [`ChunkBuffer`] strictly in height order, writes
//! each height, and publishes its events only after the writes succeed.

use super::block::FetchedBlock;
use super::chunk_buffer::ChunkBuffer;
use crate::events::{Event, EventPublisher};
use crate::processor::backoff::{retry_with_backoff, RetryBackoff, RetryDisposition, RetryFailure};
use crate::runtime::config::FetcherConfig;
use crate::runtime::fatal::FatalErrorHandler;
use crate::runtime::progress::ProgressTracker;
use crate::runtime::telemetry::Telemetry;
use crate::storage::{Storage, StorageError, StorageOp};
use anyhow::{bail, Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy)]
pub struct StorageRetryPolicy {
    pub max_attempts: usize,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl StorageRetryPolicy {
    pub fn from_config(config: &FetcherConfig) -> Self {
        Self {
            max_attempts: config.storage_max_attempts(),
            initial_backoff: config.storage_initial_backoff(),
            max_backoff: config.storage_max_backoff(),
        }
    }
}

pub struct SequencerParams {
    pub buffer: Arc<ChunkBuffer>,
    pub storage: Arc<dyn Storage>,
    pub publisher: Arc<EventPublisher>,
    pub progress: Arc<ProgressTracker>,
    pub telemetry: Arc<Telemetry>,
    pub fatal_handler: Arc<FatalErrorHandler>,
    pub retry: StorageRetryPolicy,
    pub next_commit: u64,
}

enum CommitOutcome {
    Committed,
    Cancelled,
}

pub struct Sequencer {
    buffer: Arc<ChunkBuffer>,
    storage: Arc<dyn Storage>,
    publisher: Arc<EventPublisher>,
    progress: Arc<ProgressTracker>,
    telemetry: Arc<Telemetry>,
    fatal_handler: Arc<FatalErrorHandler>,
    retry: StorageRetryPolicy,
    next_commit: u64,
}

impl Sequencer {
    pub fn new(params: SequencerParams) -> Self {
        let SequencerParams {
            buffer,
            storage,
            publisher,
            progress,
            telemetry,
            fatal_handler,
            retry,
            next_commit,
        } = params;

        Self {
            buffer,
            storage,
            publisher,
            progress,
            telemetry,
            fatal_handler,
            retry,
            next_commit,
        }
    }

    pub fn next_commit(&self) -> u64 {
        self.next_commit
    }

    /// Commits chunks until `shutdown` fires or a storage write is exhausted.
    #[tracing::instrument(name = "sequencer", skip_all)]
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<()> {
        tracing::info!(next_commit = self.next_commit, "sequencer started");

        'chunks: loop {
            let chunk = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                chunk = self.buffer.pop_next() => chunk,
            };

            if chunk.start() != self.next_commit {
                bail!(
                    "sequencer expected chunk at {} but received {}",
                    self.next_commit,
                    chunk.range()
                );
            }

            let range = chunk.range();
            for fetched in chunk.into_blocks() {
                if shutdown.is_cancelled() {
                    tracing::info!(
                        next_commit = self.next_commit,
                        end = range.end(),
                        "shutdown requested mid-chunk; remaining heights will be refetched"
                    );
                    break 'chunks;
                }

                match self.commit_height(&fetched, &shutdown).await? {
                    CommitOutcome::Committed => self.finish_height(fetched),
                    CommitOutcome::Cancelled => break 'chunks,
                }
            }

            tracing::debug!(start = range.start(), end = range.end(), "chunk committed");
        }

        let dropped = self.buffer.clear().await;
        tracing::info!(
            next_commit = self.next_commit,
            dropped_chunks = dropped,
            "sequencer stopped"
        );
        Ok(())
    }

    async fn commit_height(
        &self,
        fetched: &FetchedBlock,
        shutdown: &CancellationToken,
    ) -> Result<CommitOutcome> {
        let height = fetched.height();
        let backoff = RetryBackoff::new(self.retry.initial_backoff, self.retry.max_backoff)
            .with_max_attempts(self.retry.max_attempts)
            .with_cancellation(shutdown);

        let result = retry_with_backoff(
            backoff,
            |_attempt| self.write_height(fetched),
            |attempt, delay, err, will_retry| {
                if will_retry {
                    self.telemetry.record_storage_retry();
                    tracing::warn!(
                        height,
                        attempt,
                        backoff_ms = delay.as_millis() as u64,
                        error = %err,
                        "storage write failed; retrying height"
                    );
                }
            },
            |_, _| RetryDisposition::Retry,
        )
        .await;

        match result {
            Ok(()) => Ok(CommitOutcome::Committed),
            Err(RetryFailure::Cancelled) => Ok(CommitOutcome::Cancelled),
            Err(RetryFailure::Exhausted { attempts, error })
            | Err(RetryFailure::Aborted { attempts, error }) => {
                let op = error
                    .downcast_ref::<StorageOp>()
                    .copied()
                    .unwrap_or(StorageOp::SaveBlock);
                let storage_error = StorageError {
                    op,
                    height,
                    attempts,
                    source: error,
                };
                Err(self.fatal_handler.trigger(storage_error))
            }
        }
    }

    async fn write_height(&self, fetched: &FetchedBlock) -> Result<()> {
        self.storage
            .save_block(fetched.block())
            .await
            .context(StorageOp::SaveBlock)?;

        for tx in fetched.txs() {
            self.storage
                .save_tx(tx)
                .await
                .context(StorageOp::SaveTx { index: tx.index })?;
        }

        Ok(())
    }

    fn finish_height(&mut self, fetched: FetchedBlock) {
        let (block, txs) = fetched.into_parts();
        let height = block.height;
        let tx_count = txs.len() as u64;

        self.progress.mark_committed(height);
        self.next_commit = height.saturating_add(1);
        self.telemetry.record_committed(1, tx_count);

        self.publisher.publish(Event::new_block(Arc::new(block)));
        for tx in txs {
            self.publisher.publish(Event::new_transaction(Arc::new(tx)));
        }
        self.telemetry.record_events_published(1 + tx_count);

        tracing::trace!(height, txs = tx_count, "height committed");
    }
}
