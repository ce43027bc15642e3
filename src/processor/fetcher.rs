//! Ingestion pipeline orchestration.
//!
//! `Fetcher` composes smaller modules so each concern is owned by the
//! component that knows it best:
//! - `worker_pool` spawns the fetch workers and reports their failures.
//! - `head` keeps the planner's view of the chain head fresh.
//! - `lifecycle` wires run-scoped cancellation, the metrics reporter, and fatal
//!   error propagation.
//! - the sequencer in `ingest::sequencer` is the only storage writer.

use super::head::HeadTracker;
use super::lifecycle::{LifecycleHandles, LifecycleSpawnParams};
use super::worker_pool::{WorkerPool, WorkerPoolParams};

use crate::events::EventPublisher;
use crate::ingest::chunk_buffer::ChunkBuffer;
use crate::ingest::planner::ChunkPlanner;
use crate::ingest::sequencer::{Sequencer, SequencerParams, StorageRetryPolicy};
use crate::ingest::worker::{FetchRetryPolicy, WorkerShared, WorkerSharedParams};
use crate::rpc::Client;
use crate::runtime::config::FetcherConfig;
use crate::runtime::progress::ProgressTracker;
use crate::runtime::telemetry::Telemetry;
use crate::storage::{resume_height, Storage};
use anyhow::{bail, Context, Result};
use futures::future::join_all;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct Fetcher {
    config: FetcherConfig,
    storage: Arc<dyn Storage>,
    client: Arc<dyn Client>,
    publisher: Arc<EventPublisher>,
    running: bool,
    shutdown_root: CancellationToken,
    progress: Arc<ProgressTracker>,
    telemetry: Arc<Telemetry>,
    planner: Option<Arc<ChunkPlanner>>,
    worker_pool: Option<WorkerPool>,
    sequencer_handle: Option<JoinHandle<Result<()>>>,
    lifecycle: Option<LifecycleHandles>,
}

impl Fetcher {
    /// Creates a fetcher with its own root cancellation token.
    ///
    /// Use [`Self::with_cancellation_token`] to integrate with an existing
    /// shutdown mechanism.
    pub fn new(
        config: FetcherConfig,
        storage: Arc<dyn Storage>,
        client: Arc<dyn Client>,
        publisher: Arc<EventPublisher>,
    ) -> Self {
        Self::with_cancellation_token(config, storage, client, publisher, CancellationToken::new())
    }

    /// Creates a fetcher whose per-run tokens derive from `shutdown_token`.
    pub fn with_cancellation_token(
        config: FetcherConfig,
        storage: Arc<dyn Storage>,
        client: Arc<dyn Client>,
        publisher: Arc<EventPublisher>,
        shutdown_token: CancellationToken,
    ) -> Self {
        Self {
            config,
            storage,
            client,
            publisher,
            running: false,
            shutdown_root: shutdown_token,
            progress: Arc::new(ProgressTracker::new(None)),
            telemetry: Arc::new(Telemetry::default()),
            planner: None,
            worker_pool: None,
            sequencer_handle: None,
            lifecycle: None,
        }
    }

    pub fn config(&self) -> &FetcherConfig {
        &self.config
    }

    pub fn publisher(&self) -> &Arc<EventPublisher> {
        &self.publisher
    }

    /// Returns the last height the sequencer durably committed, or `None`
    /// while the store is empty.
    pub fn last_committed_height(&self) -> Option<u64> {
        self.progress.last_committed()
    }

    pub fn telemetry(&self) -> Arc<Telemetry> {
        self.telemetry.clone()
    }

    /// Planner of the current (or most recent) run.
    pub fn planner(&self) -> Option<Arc<ChunkPlanner>> {
        self.planner.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Workers of the current run that have not exited yet.
    pub fn active_workers(&self) -> usize {
        self.worker_pool
            .as_ref()
            .map(WorkerPool::active_workers)
            .unwrap_or(0)
    }

    /// Replaces the root shutdown token used to derive per-run cancellation tokens.
    /// This must only be called while the fetcher is idle (i.e. between `stop` and `start`).
    pub fn replace_shutdown_root(&mut self, shutdown: CancellationToken) {
        debug_assert!(
            !self.running,
            "shutdown token should not change while the fetcher is running"
        );
        self.shutdown_root = shutdown;
    }

    /// Starts ingesting from one above the store's latest height.
    ///
    /// Returns an error if the fetcher is already running or the store cannot
    /// report its latest height.
    pub async fn start(&mut self) -> Result<()> {
        if self.running {
            bail!("fetcher already running");
        }

        debug_assert!(
            self.config.validate().is_ok(),
            "FetcherConfig should have been validated at construction time"
        );

        let latest = self
            .storage
            .get_latest_height()
            .await
            .context("failed to read latest committed height")?;
        let start_height = resume_height(latest);
        self.progress.reset(latest);

        tracing::info!(
            start_height,
            slots = self.config.max_slots(),
            chunk_size = self.config.max_chunk_size(),
            "starting ingestion pipeline"
        );

        let planner = Arc::new(ChunkPlanner::new(
            start_height.saturating_sub(1),
            self.config.max_chunk_size(),
        ));
        let buffer = Arc::new(ChunkBuffer::new(
            start_height,
            self.config.max_buffered_chunks(),
        ));

        if HeadTracker::refresh_once(self.client.as_ref(), &planner)
            .await
            .is_none()
        {
            tracing::info!("initial chain head unavailable; workers idle until a refresh succeeds");
        }

        let lifecycle = LifecycleHandles::spawn(LifecycleSpawnParams {
            shutdown_root: &self.shutdown_root,
            telemetry: self.telemetry.clone(),
            buffer: buffer.clone(),
            planner: planner.clone(),
            client: self.client.clone(),
            metrics_interval: self.config.metrics_interval(),
            head_refresh_interval: self.config.head_refresh_interval(),
        });
        let fatal_handler = lifecycle.fatal_handler();
        let run_token = lifecycle.run_token.clone();

        let sequencer = Sequencer::new(SequencerParams {
            buffer: buffer.clone(),
            storage: self.storage.clone(),
            publisher: self.publisher.clone(),
            progress: self.progress.clone(),
            telemetry: self.telemetry.clone(),
            fatal_handler: fatal_handler.clone(),
            retry: StorageRetryPolicy::from_config(&self.config),
            next_commit: start_height,
        });
        let sequencer_token = run_token.clone();
        let sequencer_fatal = fatal_handler.clone();
        self.sequencer_handle = Some(tokio::spawn(async move {
            sequencer
                .run(sequencer_token)
                .await
                .map_err(|err| sequencer_fatal.trigger_external("sequencer exited with error", err))
        }));

        let mut worker_pool = WorkerPool::new(WorkerPoolParams {
            max_workers: self.config.max_slots(),
            shared: WorkerShared::new(WorkerSharedParams {
                planner: planner.clone(),
                buffer,
                client: self.client.clone(),
                telemetry: self.telemetry.clone(),
                retry: FetchRetryPolicy::from_config(&self.config),
                idle_backoff: self.config.idle_backoff(),
            }),
        });
        worker_pool.launch(run_token, fatal_handler);

        self.worker_pool = Some(worker_pool);
        self.planner = Some(planner);
        self.lifecycle = Some(lifecycle);
        self.running = true;

        Ok(())
    }

    /// Stops the pipeline and waits for every task of the run to finish.
    ///
    /// Returns the first fatal error of the run, if any.
    pub async fn stop(&mut self) -> Result<()> {
        if !self.running {
            return Ok(());
        }

        tracing::info!("stopping ingestion pipeline");

        if let Some(handles) = &self.lifecycle {
            handles.run_token.cancel();
        }

        if let Some(mut pool) = self.worker_pool.take() {
            let results = join_all(pool.shutdown()).await;
            for (idx, result) in results.into_iter().enumerate() {
                if let Err(err) = result {
                    tracing::warn!(worker = idx, error = %err, "worker task terminated unexpectedly");
                }
            }
        }
        tracing::debug!("ingestion pipeline stop: worker tasks joined");

        let mut pipeline_error: Option<anyhow::Error> = None;
        if let Some(handle) = self.sequencer_handle.take() {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    tracing::error!(error = %err, "sequencer exited with error");
                    pipeline_error = Some(err);
                }
                Err(err) => {
                    tracing::error!(error = %err, "failed to join sequencer task");
                    pipeline_error = Some(err.into());
                }
            }
        }
        tracing::debug!("ingestion pipeline stop: sequencer joined");

        let lifecycle_error = self.lifecycle.as_ref().and_then(|handles| handles.error());
        if let Some(handles) = self.lifecycle.take() {
            handles.shutdown().await;
        }

        self.running = false;
        tracing::info!(
            last_committed = ?self.progress.last_committed(),
            "ingestion pipeline stopped"
        );

        if let Some(err) = pipeline_error.or(lifecycle_error) {
            return Err(err).context("ingestion pipeline aborted");
        }

        Ok(())
    }
}
