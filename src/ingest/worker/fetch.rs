use crate::ingest::block::FetchedBlock;
use crate::ingest::chunk::{ChunkRange, CompletedChunk};
use crate::processor::backoff::{retry_with_backoff, RetryBackoff, RetryDisposition, RetryFailure};
use crate::rpc::RpcError;
use anyhow::Result;

use super::process::Worker;
use super::types::ChunkOutcome;

impl Worker {
    /// Fetches every height of `range`, retrying the whole chunk with backoff.
    ///
    /// A height above the node's head aborts immediately. The returned error
    /// is reserved for a chunk that cannot be assembled from what was fetched.
    pub(super) async fn fetch_chunk(&self, range: ChunkRange) -> Result<ChunkOutcome> {
        let backoff = RetryBackoff::new(self.retry.initial_backoff, self.retry.max_backoff)
            .with_max_attempts(self.retry.max_attempts)
            .with_cancellation(&self.shutdown);

        let attempts = retry_with_backoff(
            backoff,
            |_attempt| self.fetch_range(range),
            |attempt, delay, err, will_retry| {
                self.record_fetch_failure(err);
                if will_retry {
                    tracing::warn!(
                        worker = self.id,
                        start = range.start(),
                        end = range.end(),
                        attempt,
                        backoff_ms = delay.as_millis() as u64,
                        error = %err,
                        "chunk fetch attempt failed; retrying"
                    );
                }
            },
            |_, err| match err.downcast_ref::<RpcError>() {
                Some(RpcError::HeightNotFound { .. }) => RetryDisposition::Abort,
                _ => RetryDisposition::Retry,
            },
        );

        // Dropping `attempts` aborts the in-flight request.
        let result = tokio::select! {
            _ = self.shutdown.cancelled() => return Ok(ChunkOutcome::Cancelled),
            result = attempts => result,
        };

        match result {
            Ok(blocks) => Ok(ChunkOutcome::Fetched(CompletedChunk::new(range, blocks)?)),
            Err(RetryFailure::Cancelled) => Ok(ChunkOutcome::Cancelled),
            Err(RetryFailure::Aborted { attempts, error }) => {
                match error.downcast_ref::<RpcError>() {
                    Some(RpcError::HeightNotFound { height }) => Ok(ChunkOutcome::HeadReached {
                        missing_height: *height,
                    }),
                    _ => Ok(ChunkOutcome::Failed { attempts, error }),
                }
            }
            Err(RetryFailure::Exhausted { attempts, error }) => {
                Ok(ChunkOutcome::Failed { attempts, error })
            }
        }
    }

    async fn fetch_range(&self, range: ChunkRange) -> Result<Vec<FetchedBlock>> {
        let mut blocks = Vec::with_capacity(range.size() as usize);
        for height in range.heights() {
            blocks.push(self.fetch_height(height).await?);
        }
        Ok(blocks)
    }

    pub(super) async fn fetch_height(&self, height: u64) -> Result<FetchedBlock> {
        let block = self.client.get_block(height).await?;
        if block.height != height {
            return Err(RpcError::Inconsistent {
                height,
                reason: format!("node returned block {}", block.height),
            }
            .into());
        }

        let results = self.client.get_block_results(height).await?;
        Ok(FetchedBlock::assemble(block, results)?)
    }

    fn record_fetch_failure(&self, err: &anyhow::Error) {
        match err.downcast_ref::<RpcError>() {
            Some(RpcError::Timeout { .. }) => self.telemetry.record_fetch_timeout(),
            _ => self.telemetry.record_fetch_error(),
        }
    }
}
