//! Process-wide tracing setup, pipeline counters and the periodic metrics log.

use crate::ingest::chunk_buffer::ChunkBuffer;
use crate::ingest::planner::ChunkPlanner;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(5);

const METRICS_TARGET: &str = "tx_indexer::metrics";

static TRACING_INIT: Once = Once::new();

/// Installs a fmt subscriber filtered by `RUST_LOG`, defaulting to `info`.
///
/// Only the first call has an effect; an already installed global
/// subscriber is left alone.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .try_init();
    });
}

/// Monotonic pipeline counters shared by the workers and the sequencer.
#[derive(Default, Debug)]
pub struct Telemetry {
    committed_heights: AtomicU64,
    committed_txs: AtomicU64,
    fetched_chunks: AtomicU64,
    released_chunks: AtomicU64,
    fetch_errors: AtomicU64,
    fetch_timeouts: AtomicU64,
    storage_retries: AtomicU64,
    events_published: AtomicU64,
}

fn bump(counter: &AtomicU64, by: u64) {
    if by > 0 {
        counter.fetch_add(by, Ordering::Relaxed);
    }
}

impl Telemetry {
    pub fn record_committed(&self, heights: u64, txs: u64) {
        bump(&self.committed_heights, heights);
        bump(&self.committed_txs, txs);
    }

    pub fn record_fetched_chunk(&self) {
        bump(&self.fetched_chunks, 1);
    }

    pub fn record_released_chunk(&self) {
        bump(&self.released_chunks, 1);
    }

    pub fn record_fetch_error(&self) {
        bump(&self.fetch_errors, 1);
    }

    /// Timeouts count as fetch errors too.
    pub fn record_fetch_timeout(&self) {
        bump(&self.fetch_timeouts, 1);
        bump(&self.fetch_errors, 1);
    }

    pub fn record_storage_retry(&self) {
        bump(&self.storage_retries, 1);
    }

    pub fn record_events_published(&self, count: u64) {
        bump(&self.events_published, count);
    }

    pub fn committed_heights(&self) -> u64 {
        self.committed_heights.load(Ordering::Relaxed)
    }

    pub fn storage_retries(&self) -> u64 {
        self.storage_retries.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        TelemetrySnapshot {
            committed_heights: load(&self.committed_heights),
            committed_txs: load(&self.committed_txs),
            fetched_chunks: load(&self.fetched_chunks),
            released_chunks: load(&self.released_chunks),
            fetch_errors: load(&self.fetch_errors),
            fetch_timeouts: load(&self.fetch_timeouts),
            storage_retries: load(&self.storage_retries),
            events_published: load(&self.events_published),
        }
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    pub committed_heights: u64,
    pub committed_txs: u64,
    pub fetched_chunks: u64,
    pub released_chunks: u64,
    pub fetch_errors: u64,
    pub fetch_timeouts: u64,
    pub storage_retries: u64,
    pub events_published: u64,
}

impl TelemetrySnapshot {
    /// Heights committed per second since `earlier`, taken `elapsed` ago.
    pub fn commit_rate(&self, earlier: &TelemetrySnapshot, elapsed: Duration) -> f64 {
        let seconds = elapsed.as_secs_f64();
        if seconds <= f64::EPSILON {
            return 0.0;
        }
        self.committed_heights
            .saturating_sub(earlier.committed_heights) as f64
            / seconds
    }
}

/// Logs one metrics line every `interval` under `tx_indexer::metrics`
/// until `shutdown` fires.
pub fn spawn_metrics_reporter(
    telemetry: Arc<Telemetry>,
    buffer: Arc<ChunkBuffer>,
    planner: Arc<ChunkPlanner>,
    shutdown: CancellationToken,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut previous = (telemetry.snapshot(), Instant::now());

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let snapshot = telemetry.snapshot();
                    let rate = snapshot.commit_rate(&previous.0, previous.1.elapsed());
                    let next_commit = buffer.next_commit().await;
                    let buffered_chunks = buffer.len().await;

                    tracing::info!(
                        target: METRICS_TARGET,
                        heights_per_sec = format!("{rate:.2}"),
                        committed = snapshot.committed_heights,
                        committed_txs = snapshot.committed_txs,
                        next_commit,
                        head = ?planner.head(),
                        buffered_chunks,
                        claimed_chunks = planner.claimed().len(),
                        released_chunks = snapshot.released_chunks,
                        fetch_errors = snapshot.fetch_errors,
                        fetch_timeouts = snapshot.fetch_timeouts,
                        storage_retries = snapshot.storage_retries,
                        events_published = snapshot.events_published,
                        "ingestion metrics"
                    );
                    previous = (snapshot, Instant::now());
                }
            }
        }

        tracing::debug!(target: METRICS_TARGET, "metrics reporter stopped");
    })
}
