//! First-error-wins capture of unrecoverable pipeline failures.

use crate::storage::StorageError;
use anyhow::Error as AnyError;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Which part of the pipeline gave up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FatalOrigin {
    /// The sequencer spent every write attempt for `height`.
    Storage { height: u64 },
    /// A worker or the sequencer task exited abnormally.
    Task { context: String },
}

impl fmt::Display for FatalOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FatalOrigin::Storage { .. } => write!(f, "storage write exhausted its retries"),
            FatalOrigin::Task { context } => f.write_str(context),
        }
    }
}

/// Records the first unrecoverable pipeline error and cancels the run.
///
/// Cloning shares the same slot; later triggers are logged and returned to
/// the caller but never replace the captured error.
#[derive(Clone)]
pub struct FatalErrorHandler {
    inner: Arc<FatalInner>,
}

struct FatalInner {
    root_shutdown: CancellationToken,
    run_shutdown: CancellationToken,
    /// Cancelled exactly once, when the slot is filled.
    fired: CancellationToken,
    slot: Mutex<Option<SharedError>>,
}

/// The captured error, shareable with every caller that asks for it.
///
/// Displays the origin; the captured error follows as its source.
#[derive(Clone)]
struct SharedError {
    origin: FatalOrigin,
    error: Arc<AnyError>,
}

impl fmt::Debug for SharedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {:?}", self.origin, self.error)
    }
}

impl fmt::Display for SharedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.origin, f)
    }
}

impl std::error::Error for SharedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        let inner: &(dyn std::error::Error + 'static) = &**self.error;
        Some(inner)
    }
}

impl FatalErrorHandler {
    pub fn new(root_shutdown: CancellationToken, run_shutdown: CancellationToken) -> Self {
        Self {
            inner: Arc::new(FatalInner {
                root_shutdown,
                run_shutdown,
                fired: CancellationToken::new(),
                slot: Mutex::new(None),
            }),
        }
    }

    /// Reports a storage write that exhausted its retries.
    pub fn trigger(&self, error: StorageError) -> AnyError {
        tracing::error!(
            height = error.height,
            op = %error.op,
            attempts = error.attempts,
            error = %error,
            "storage write exhausted retries; initiating shutdown"
        );
        let origin = FatalOrigin::Storage {
            height: error.height,
        };
        self.capture(origin, error.into())
    }

    /// Reports a task that died in a way the pipeline cannot recover from.
    pub fn trigger_external(&self, context: &str, error: AnyError) -> AnyError {
        if self.is_triggered() {
            // Usually the echo of a failure that already cancelled the run.
            tracing::debug!(context, error = %error, "fatal error after shutdown began");
            return error;
        }
        tracing::error!(context, error = %error, "fatal pipeline error; initiating shutdown");
        let origin = FatalOrigin::Task {
            context: context.to_owned(),
        };
        self.capture(origin, error)
    }

    fn capture(&self, origin: FatalOrigin, error: AnyError) -> AnyError {
        let shared = {
            let mut slot = self.inner.slot.lock();
            if slot.is_some() {
                return error;
            }
            let shared = SharedError {
                origin,
                error: Arc::new(error),
            };
            *slot = Some(shared.clone());
            shared
        };

        self.inner.run_shutdown.cancel();
        self.inner.root_shutdown.cancel();
        self.inner.fired.cancel();
        shared.into()
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.fired.is_cancelled()
    }

    pub fn origin(&self) -> Option<FatalOrigin> {
        self.inner
            .slot
            .lock()
            .as_ref()
            .map(|shared| shared.origin.clone())
    }

    pub fn error(&self) -> Option<AnyError> {
        self.inner
            .slot
            .lock()
            .as_ref()
            .map(|shared| shared.clone().into())
    }

    /// Resolves once a fatal error has been captured.
    pub async fn wait(&self) {
        self.inner.fired.cancelled().await;
    }
}
