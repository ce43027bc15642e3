//! Process-level driver: one root token, OS signals and a restartable fetcher.

use crate::{Client, EventPublisher, Fetcher, FetcherConfig, Storage, TmRpcClient};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Why [`Runner::run_until_ctrl_c`] stopped waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    Signal(&'static str),
    /// A fatal error or an embedder cancelled the root token.
    Cancelled,
}

/// Owns the [`Fetcher`] for a process and the root token its runs derive
/// from.
///
/// Every stop swaps in a fresh root token, so a runner can be started again.
pub struct Runner {
    fetcher: Fetcher,
    shutdown: CancellationToken,
    started: bool,
}

impl Runner {
    pub fn new(
        config: FetcherConfig,
        storage: Arc<dyn Storage>,
        client: Arc<dyn Client>,
        publisher: Arc<EventPublisher>,
    ) -> Self {
        let shutdown = CancellationToken::new();
        Self {
            fetcher: Fetcher::with_cancellation_token(
                config,
                storage,
                client,
                publisher,
                shutdown.clone(),
            ),
            shutdown,
            started: false,
        }
    }

    /// Builds a runner that reads from `config.remote()` over Tendermint2 JSON-RPC.
    pub fn from_config(
        config: FetcherConfig,
        storage: Arc<dyn Storage>,
        publisher: Arc<EventPublisher>,
    ) -> Result<Self> {
        let client = TmRpcClient::from_config(&config)
            .with_context(|| format!("failed to build RPC client for {}", config.remote()))?;
        Ok(Self::new(config, storage, Arc::new(client), publisher))
    }

    /// Token of the current run. Cancelling it stops [`Self::run_until_ctrl_c`].
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn fetcher(&self) -> &Fetcher {
        &self.fetcher
    }

    pub async fn start(&mut self) -> Result<()> {
        if !self.started {
            self.fetcher.start().await?;
            self.started = true;
        }
        Ok(())
    }

    /// Cancels the root token, waits for the fetcher and returns its first
    /// fatal error, if any.
    pub async fn stop(&mut self) -> Result<()> {
        if !self.started {
            return Ok(());
        }

        self.shutdown.cancel();
        let outcome = self.fetcher.stop().await;
        self.started = false;

        self.shutdown = CancellationToken::new();
        self.fetcher.replace_shutdown_root(self.shutdown.clone());
        outcome
    }

    /// Ingests until Ctrl-C, SIGTERM on unix, or cancellation of the root token.
    pub async fn run_until_ctrl_c(&mut self) -> Result<()> {
        self.start().await?;
        tracing::info!(remote = self.fetcher.config().remote(), "indexer running");

        let reason = tokio::select! {
            signal = shutdown_signal() => StopReason::Signal(signal),
            _ = self.shutdown.cancelled() => StopReason::Cancelled,
        };
        tracing::info!(?reason, "stopping indexer");

        self.stop().await
    }
}

/// Resolves with the name of the first termination signal received.
async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %err, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => tokio::select! {
                _ = ctrl_c => "SIGINT",
                _ = terminate.recv() => "SIGTERM",
            },
            Err(err) => {
                tracing::warn!(error = %err, "failed to listen for SIGTERM");
                ctrl_c.await;
                "SIGINT"
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await;
        "Ctrl-C"
    }
}
