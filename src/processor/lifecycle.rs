//! Per-run scaffolding for `Fetcher`: the run token derived from the root
//! token, the fatal handler, and the background tasks that share the run.

use super::head::HeadTracker;
use crate::ingest::chunk_buffer::ChunkBuffer;
use crate::ingest::planner::ChunkPlanner;
use crate::rpc::Client;
use crate::runtime::fatal::FatalErrorHandler;
use crate::runtime::telemetry::{self, Telemetry};
use anyhow::Error;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub(crate) struct LifecycleHandles {
    pub run_token: CancellationToken,
    fatal_handler: Arc<FatalErrorHandler>,
    background: Vec<(&'static str, JoinHandle<()>)>,
}

pub(crate) struct LifecycleSpawnParams<'a> {
    pub shutdown_root: &'a CancellationToken,
    pub telemetry: Arc<Telemetry>,
    pub buffer: Arc<ChunkBuffer>,
    pub planner: Arc<ChunkPlanner>,
    pub client: Arc<dyn Client>,
    pub metrics_interval: Duration,
    pub head_refresh_interval: Duration,
}

impl LifecycleHandles {
    pub(crate) fn spawn(params: LifecycleSpawnParams<'_>) -> Self {
        let run_token = params.shutdown_root.child_token();
        let fatal_handler = Arc::new(FatalErrorHandler::new(
            params.shutdown_root.clone(),
            run_token.clone(),
        ));

        let background = vec![
            (
                "metrics reporter",
                telemetry::spawn_metrics_reporter(
                    params.telemetry,
                    params.buffer,
                    params.planner.clone(),
                    run_token.clone(),
                    params.metrics_interval,
                ),
            ),
            (
                "chain head refresher",
                HeadTracker::spawn_refresh_loop(
                    params.client,
                    params.planner,
                    params.head_refresh_interval,
                    run_token.clone(),
                ),
            ),
        ];

        Self {
            run_token,
            fatal_handler,
            background,
        }
    }

    pub(crate) fn fatal_handler(&self) -> Arc<FatalErrorHandler> {
        self.fatal_handler.clone()
    }

    pub(crate) fn error(&self) -> Option<Error> {
        self.fatal_handler.error()
    }

    /// Joins the background tasks. The run token must already be cancelled.
    pub(crate) async fn shutdown(self) {
        let (names, handles): (Vec<_>, Vec<_>) = self.background.into_iter().unzip();
        for (task, result) in names.into_iter().zip(join_all(handles).await) {
            if let Err(err) = result {
                tracing::warn!(task, error = %err, "background task panicked");
            }
        }
    }
}
