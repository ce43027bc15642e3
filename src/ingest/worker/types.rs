use crate::ingest::chunk::CompletedChunk;
use crate::runtime::config::FetcherConfig;
use std::time::Duration;

/// Bounds on how long one worker keeps retrying a chunk before giving it back.
#[derive(Debug, Clone, Copy)]
pub struct FetchRetryPolicy {
    pub max_attempts: usize,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl FetchRetryPolicy {
    pub fn from_config(config: &FetcherConfig) -> Self {
        Self {
            max_attempts: config.fetch_max_attempts(),
            initial_backoff: config.fetch_initial_backoff(),
            max_backoff: config.fetch_max_backoff(),
        }
    }
}

#[derive(Debug)]
pub(super) enum ChunkOutcome {
    Fetched(CompletedChunk),
    Failed {
        attempts: usize,
        error: anyhow::Error,
    },
    /// The node reported `missing_height` as above its head.
    HeadReached {
        missing_height: u64,
    },
    Cancelled,
}
