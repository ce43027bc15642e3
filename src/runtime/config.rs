use crate::runtime::telemetry;
use anyhow::{bail, Context, Result};
use std::time::Duration;

pub const DEFAULT_DB_PATH: &str = "indexer-db";
pub const DEFAULT_MAX_SLOTS: usize = 100;
pub const DEFAULT_MAX_CHUNK_SIZE: u64 = 100;

const DEFAULT_RPC_TIMEOUT_SECS: u64 = 10;
const DEFAULT_IDLE_BACKOFF_SECS: u64 = 1;
const DEFAULT_HEAD_REFRESH_INTERVAL_SECS: u64 = 1;
const DEFAULT_FETCH_MAX_ATTEMPTS: usize = 3;
const DEFAULT_FETCH_INITIAL_BACKOFF_MS: u64 = 250;
const DEFAULT_FETCH_MAX_BACKOFF_MS: u64 = 2_000;
const DEFAULT_STORAGE_MAX_ATTEMPTS: usize = 5;
const DEFAULT_STORAGE_INITIAL_BACKOFF_MS: u64 = 100;
const DEFAULT_STORAGE_MAX_BACKOFF_MS: u64 = 5_000;

/// Runtime configuration for the ingestion pipeline.
///
/// All instances must be constructed via [`FetcherConfig::builder`] or [`FetcherConfig::new`]
/// so invariants are validated before any consumer observes the values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetcherConfig {
    remote: String,
    db_path: String,
    max_slots: usize,
    max_chunk_size: u64,
    max_buffered_chunks: usize,
    rpc_timeout: Duration,
    idle_backoff: Duration,
    head_refresh_interval: Duration,
    metrics_interval: Duration,
    fetch_max_attempts: usize,
    fetch_initial_backoff: Duration,
    fetch_max_backoff: Duration,
    storage_max_attempts: usize,
    storage_initial_backoff: Duration,
    storage_max_backoff: Duration,
}

pub struct FetcherConfigParams {
    pub remote: String,
    pub db_path: String,
    pub max_slots: usize,
    pub max_chunk_size: u64,
    pub max_buffered_chunks: usize,
    pub rpc_timeout: Duration,
    pub idle_backoff: Duration,
    pub head_refresh_interval: Duration,
    pub metrics_interval: Duration,
    pub fetch_max_attempts: usize,
    pub fetch_initial_backoff: Duration,
    pub fetch_max_backoff: Duration,
    pub storage_max_attempts: usize,
    pub storage_initial_backoff: Duration,
    pub storage_max_backoff: Duration,
}

impl FetcherConfig {
    /// Returns a builder to incrementally construct and validate a configuration.
    pub fn builder() -> FetcherConfigBuilder {
        FetcherConfigBuilder::default()
    }

    /// Constructs a configuration directly from the provided values.
    ///
    /// Prefer [`FetcherConfig::builder`] when most values use defaults.
    pub fn new(params: FetcherConfigParams) -> Result<Self> {
        let FetcherConfigParams {
            remote,
            db_path,
            max_slots,
            max_chunk_size,
            max_buffered_chunks,
            rpc_timeout,
            idle_backoff,
            head_refresh_interval,
            metrics_interval,
            fetch_max_attempts,
            fetch_initial_backoff,
            fetch_max_backoff,
            storage_max_attempts,
            storage_initial_backoff,
            storage_max_backoff,
        } = params;

        let config = Self {
            remote: trimmed_string(remote),
            db_path: trimmed_string(db_path),
            max_slots,
            max_chunk_size,
            max_buffered_chunks,
            rpc_timeout,
            idle_backoff,
            head_refresh_interval,
            metrics_interval,
            fetch_max_attempts,
            fetch_initial_backoff,
            fetch_max_backoff,
            storage_max_attempts,
            storage_initial_backoff,
            storage_max_backoff,
        };

        config.validate()?;
        Ok(config)
    }

    /// JSON-RPC endpoint (including scheme) of the remote node.
    pub fn remote(&self) -> &str {
        &self.remote
    }

    /// Location handed to the storage layer.
    pub fn db_path(&self) -> &str {
        &self.db_path
    }

    /// Number of concurrent fetch workers.
    pub fn max_slots(&self) -> usize {
        self.max_slots
    }

    pub fn max_chunk_size(&self) -> u64 {
        self.max_chunk_size
    }

    /// Completed chunks the sequencer may hold before workers wait for room.
    pub fn max_buffered_chunks(&self) -> usize {
        self.max_buffered_chunks
    }

    pub fn rpc_timeout(&self) -> Duration {
        self.rpc_timeout
    }

    /// Pause a worker takes when the planner has no work.
    pub fn idle_backoff(&self) -> Duration {
        self.idle_backoff
    }

    pub fn head_refresh_interval(&self) -> Duration {
        self.head_refresh_interval
    }

    pub fn metrics_interval(&self) -> Duration {
        self.metrics_interval
    }

    pub fn fetch_max_attempts(&self) -> usize {
        self.fetch_max_attempts
    }

    pub fn fetch_initial_backoff(&self) -> Duration {
        self.fetch_initial_backoff
    }

    pub fn fetch_max_backoff(&self) -> Duration {
        self.fetch_max_backoff
    }

    pub fn storage_max_attempts(&self) -> usize {
        self.storage_max_attempts
    }

    pub fn storage_initial_backoff(&self) -> Duration {
        self.storage_initial_backoff
    }

    pub fn storage_max_backoff(&self) -> Duration {
        self.storage_max_backoff
    }

    /// Performs validation on an existing configuration instance.
    pub fn validate(&self) -> Result<()> {
        validate_url(&self.remote)?;
        ensure_not_empty(&self.db_path, "db_path")?;

        if self.max_slots == 0 {
            bail!("max_slots must be greater than 0");
        }

        if self.max_chunk_size == 0 {
            bail!("max_chunk_size must be greater than 0");
        }

        if self.max_buffered_chunks == 0 {
            bail!("max_buffered_chunks must be greater than 0");
        }

        ensure_positive(self.rpc_timeout, "rpc_timeout")?;
        ensure_positive(self.idle_backoff, "idle_backoff")?;
        ensure_positive(self.head_refresh_interval, "head_refresh_interval")?;
        ensure_positive(self.metrics_interval, "metrics_interval")?;

        validate_retry(
            "fetch",
            self.fetch_max_attempts,
            self.fetch_initial_backoff,
            self.fetch_max_backoff,
        )?;
        validate_retry(
            "storage",
            self.storage_max_attempts,
            self.storage_initial_backoff,
            self.storage_max_backoff,
        )?;

        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct FetcherConfigBuilder {
    remote: Option<String>,
    db_path: Option<String>,
    max_slots: Option<usize>,
    max_chunk_size: Option<u64>,
    max_buffered_chunks: Option<usize>,
    rpc_timeout: Option<Duration>,
    idle_backoff: Option<Duration>,
    head_refresh_interval: Option<Duration>,
    metrics_interval: Option<Duration>,
    fetch_max_attempts: Option<usize>,
    fetch_initial_backoff: Option<Duration>,
    fetch_max_backoff: Option<Duration>,
    storage_max_attempts: Option<usize>,
    storage_initial_backoff: Option<Duration>,
    storage_max_backoff: Option<Duration>,
}

impl FetcherConfigBuilder {
    pub fn remote(mut self, url: impl Into<String>) -> Self {
        self.remote = Some(url.into());
        self
    }

    pub fn db_path(mut self, path: impl Into<String>) -> Self {
        self.db_path = Some(path.into());
        self
    }

    pub fn max_slots(mut self, slots: usize) -> Self {
        self.max_slots = Some(slots);
        self
    }

    pub fn max_chunk_size(mut self, size: u64) -> Self {
        self.max_chunk_size = Some(size);
        self
    }

    pub fn max_buffered_chunks(mut self, chunks: usize) -> Self {
        self.max_buffered_chunks = Some(chunks);
        self
    }

    pub fn rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = Some(timeout);
        self
    }

    pub fn idle_backoff(mut self, backoff: Duration) -> Self {
        self.idle_backoff = Some(backoff);
        self
    }

    pub fn head_refresh_interval(mut self, interval: Duration) -> Self {
        self.head_refresh_interval = Some(interval);
        self
    }

    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = Some(interval);
        self
    }

    pub fn fetch_max_attempts(mut self, attempts: usize) -> Self {
        self.fetch_max_attempts = Some(attempts);
        self
    }

    pub fn fetch_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.fetch_initial_backoff = Some(initial);
        self.fetch_max_backoff = Some(max);
        self
    }

    pub fn storage_max_attempts(mut self, attempts: usize) -> Self {
        self.storage_max_attempts = Some(attempts);
        self
    }

    pub fn storage_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.storage_initial_backoff = Some(initial);
        self.storage_max_backoff = Some(max);
        self
    }

    pub fn build(self) -> Result<FetcherConfig> {
        let max_slots = self.max_slots.unwrap_or(DEFAULT_MAX_SLOTS);
        let params = FetcherConfigParams {
            remote: self.remote.context("remote is required")?,
            db_path: self.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_owned()),
            max_slots,
            max_chunk_size: self.max_chunk_size.unwrap_or(DEFAULT_MAX_CHUNK_SIZE),
            max_buffered_chunks: self
                .max_buffered_chunks
                .unwrap_or_else(|| max_slots.saturating_mul(2)),
            rpc_timeout: self
                .rpc_timeout
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_RPC_TIMEOUT_SECS)),
            idle_backoff: self
                .idle_backoff
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_IDLE_BACKOFF_SECS)),
            head_refresh_interval: self
                .head_refresh_interval
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_HEAD_REFRESH_INTERVAL_SECS)),
            metrics_interval: self
                .metrics_interval
                .unwrap_or(telemetry::DEFAULT_METRICS_INTERVAL),
            fetch_max_attempts: self.fetch_max_attempts.unwrap_or(DEFAULT_FETCH_MAX_ATTEMPTS),
            fetch_initial_backoff: self
                .fetch_initial_backoff
                .unwrap_or_else(|| Duration::from_millis(DEFAULT_FETCH_INITIAL_BACKOFF_MS)),
            fetch_max_backoff: self
                .fetch_max_backoff
                .unwrap_or_else(|| Duration::from_millis(DEFAULT_FETCH_MAX_BACKOFF_MS)),
            storage_max_attempts: self
                .storage_max_attempts
                .unwrap_or(DEFAULT_STORAGE_MAX_ATTEMPTS),
            storage_initial_backoff: self
                .storage_initial_backoff
                .unwrap_or_else(|| Duration::from_millis(DEFAULT_STORAGE_INITIAL_BACKOFF_MS)),
            storage_max_backoff: self
                .storage_max_backoff
                .unwrap_or_else(|| Duration::from_millis(DEFAULT_STORAGE_MAX_BACKOFF_MS)),
        };

        FetcherConfig::new(params)
    }
}

fn trimmed_string(value: String) -> String {
    value.trim().to_owned()
}

fn ensure_not_empty(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        bail!("{field} cannot be empty");
    }
    Ok(())
}

fn ensure_positive(value: Duration, field: &str) -> Result<()> {
    if value.is_zero() {
        bail!("{field} must be greater than 0");
    }
    Ok(())
}

fn validate_url(url: &str) -> Result<()> {
    let url = url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        bail!("remote must start with http:// or https://");
    }
    Ok(())
}

fn validate_retry(label: &str, attempts: usize, initial: Duration, max: Duration) -> Result<()> {
    if attempts == 0 {
        bail!("{label}_max_attempts must be greater than 0");
    }
    ensure_positive(initial, &format!("{label}_initial_backoff"))?;
    ensure_positive(max, &format!("{label}_max_backoff"))?;
    if initial > max {
        bail!("{label}_initial_backoff must not exceed {label}_max_backoff");
    }
    Ok(())
}
