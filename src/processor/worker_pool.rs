//! Worker pool orchestration for `Fetcher`.
//!
//! This module owns worker creation for one run and turns worker errors or
//! panics into fatal pipeline errors.

use crate::ingest::worker::{Worker, WorkerShared};
use crate::runtime::fatal::FatalErrorHandler;
use futures::FutureExt;
use std::{
    any::Any,
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub(crate) struct WorkerPool {
    max_workers: usize,
    shared: WorkerShared,
    active_workers: Arc<AtomicUsize>,
    workers: Vec<JoinHandle<()>>,
}

pub(crate) struct WorkerPoolParams {
    pub max_workers: usize,
    pub shared: WorkerShared,
}

impl WorkerPool {
    pub(crate) fn new(params: WorkerPoolParams) -> Self {
        Self {
            max_workers: params.max_workers.max(1),
            shared: params.shared,
            active_workers: Arc::new(AtomicUsize::new(0)),
            workers: Vec::new(),
        }
    }

    /// Workers whose task has not returned yet.
    pub(crate) fn active_workers(&self) -> usize {
        self.active_workers.load(Ordering::SeqCst)
    }

    /// Spawns `max_workers` workers bound to `run_token`.
    pub(crate) fn launch(
        &mut self,
        run_token: CancellationToken,
        fatal_handler: Arc<FatalErrorHandler>,
    ) {
        self.workers.clear();

        for worker_id in 0..self.max_workers {
            let worker = Worker::new(worker_id, self.shared.clone(), run_token.clone());
            let guard = ActiveGuard::enter(self.active_workers.clone());
            let fatal_handler = fatal_handler.clone();
            self.workers.push(tokio::spawn(async move {
                let _guard = guard;
                supervise(worker, fatal_handler.as_ref()).await;
            }));
        }

        tracing::info!(workers = self.workers.len(), "worker pool launched");
    }

    /// Hands back every join handle so the caller can wait for the workers.
    /// Workers stop on their own once the run token is cancelled.
    pub(crate) fn shutdown(&mut self) -> Vec<JoinHandle<()>> {
        std::mem::take(&mut self.workers)
    }
}

/// Counts a worker as active until its task finishes, panics included.
struct ActiveGuard(Arc<AtomicUsize>);

impl ActiveGuard {
    fn enter(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Runs one worker to completion and turns an error or a panic into a
/// fatal pipeline error.
async fn supervise(worker: Worker, fatal_handler: &FatalErrorHandler) {
    let worker_id = worker.id;
    let panic_msg = match AssertUnwindSafe(worker.run()).catch_unwind().await {
        Ok(Ok(())) => return,
        Ok(Err(err)) => {
            tracing::error!(worker = worker_id, error = %err, "worker exited with error");
            let context = format!("worker {worker_id} exited with error");
            fatal_handler.trigger_external(&context, err);
            return;
        }
        Err(payload) => panic_message(payload.as_ref()),
    };

    tracing::error!(worker = worker_id, panic = %panic_msg, "worker panicked");
    fatal_handler.trigger_external(
        &format!("worker {worker_id} panicked"),
        anyhow::anyhow!(panic_msg),
    );
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
