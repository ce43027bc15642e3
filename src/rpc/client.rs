//! Chain client contract consumed by the fetch workers, plus the
//! Tendermint2 JSON-RPC implementation built on jsonrpsee.

use crate::ingest::block::{Block, BlockResults};
use crate::rpc::helpers::{decode_txs, is_height_above_head};
use crate::rpc::metrics::{CallOutcome, RpcMetrics, RpcMetricsSnapshot};
use crate::rpc::options::RpcClientOptions;
use crate::rpc::response::{BlockResponse, BlockResultsResponse, StatusResponse};
use crate::runtime::config::FetcherConfig;
use anyhow::{anyhow, Result};
use futures::future::BoxFuture;
use jsonrpsee::core::client::{ClientT, Error as JsonRpcError};
use jsonrpsee::core::params::ArrayParams;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::rpc_params;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::time::{timeout, Instant};

#[derive(Debug)]
pub enum RpcError {
    Timeout { method: &'static str },
    HeightNotFound { height: u64 },
    Inconsistent { height: u64, reason: String },
    Transport { method: &'static str, message: String },
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RpcError::Timeout { method } => write!(f, "rpc method {method} timed out"),
            RpcError::HeightNotFound { height } => {
                write!(f, "requested height {height} is above the chain head")
            }
            RpcError::Inconsistent { height, reason } => {
                write!(f, "inconsistent response for height {height}: {reason}")
            }
            RpcError::Transport { method, message } => {
                write!(f, "rpc {method} call failed: {message}")
            }
        }
    }
}

impl std::error::Error for RpcError {}

/// Read access to the remote chain.
///
/// Errors that callers need to classify are [`RpcError`]s wrapped in
/// `anyhow::Error`; use `downcast_ref::<RpcError>()` to inspect them.
pub trait Client: Send + Sync {
    fn get_latest_block_number(&self) -> BoxFuture<'_, Result<u64>>;

    fn get_block(&self, height: u64) -> BoxFuture<'_, Result<Block>>;

    fn get_block_results(&self, height: u64) -> BoxFuture<'_, Result<BlockResults>>;
}

#[derive(Debug, Clone)]
pub struct TmRpcClient {
    endpoint: Arc<String>,
    client: HttpClient,
    options: RpcClientOptions,
    metrics: Arc<RpcMetrics>,
}

impl Client for TmRpcClient {
    fn get_latest_block_number(&self) -> BoxFuture<'_, Result<u64>> {
        Box::pin(self.latest_block_number())
    }

    fn get_block(&self, height: u64) -> BoxFuture<'_, Result<Block>> {
        Box::pin(self.block(height))
    }

    fn get_block_results(&self, height: u64) -> BoxFuture<'_, Result<BlockResults>> {
        Box::pin(self.block_results(height))
    }
}

impl TmRpcClient {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        Self::with_options(url, RpcClientOptions::default())
    }

    pub fn with_options(url: impl Into<String>, options: RpcClientOptions) -> Result<Self> {
        options.validate()?;

        let endpoint = url.into();
        let max_request_body_size = options.max_request_body_bytes.min(u32::MAX as usize) as u32;
        let max_response_body_size = options.max_response_body_bytes.min(u32::MAX as usize) as u32;

        let client = HttpClientBuilder::default()
            .request_timeout(options.request_timeout)
            .max_concurrent_requests(options.max_concurrent_requests)
            .max_request_size(max_request_body_size)
            .max_response_size(max_response_body_size)
            .build(&endpoint)
            .map_err(|err| anyhow!("failed to build RPC client: {err}"))?;

        Ok(Self {
            endpoint: Arc::new(endpoint),
            client,
            options,
            metrics: Arc::new(RpcMetrics::default()),
        })
    }

    pub fn from_config(config: &FetcherConfig) -> Result<Self> {
        config.validate()?;
        let options = RpcClientOptions::for_slots(config.max_slots(), config.rpc_timeout());
        Self::with_options(config.remote().to_owned(), options)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn metrics(&self) -> RpcMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub async fn latest_block_number(&self) -> Result<u64> {
        let status: StatusResponse = self.call("status", rpc_params![], None).await?;
        let height = status.sync_info.latest_block_height;
        tracing::debug!(head = height, "refreshed chain head");
        Ok(height)
    }

    pub async fn block(&self, height: u64) -> Result<Block> {
        let raw: serde_json::Value = self
            .call("block", rpc_params![height.to_string()], Some(height))
            .await?;
        let response: BlockResponse = serde_json::from_value(raw.clone())
            .map_err(|err| inconsistent(height, format!("malformed block response: {err}")))?;

        let txs = decode_txs(response.block.data.txs.as_deref())
            .map_err(|err| inconsistent(height, format!("{err:#}")))?;

        Ok(Block {
            height: response.block.header.height,
            hash: response.block_meta.block_id.hash.unwrap_or_default(),
            chain_id: response.block.header.chain_id,
            time: response.block.header.time,
            txs,
            raw,
        })
    }

    pub async fn block_results(&self, height: u64) -> Result<BlockResults> {
        let response: BlockResultsResponse = self
            .call("block_results", rpc_params![height.to_string()], Some(height))
            .await?;

        Ok(BlockResults {
            height: response.height,
            deliver_tx: response.results.deliver_tx.unwrap_or_default(),
        })
    }

    async fn call<R>(&self, method: &'static str, params: ArrayParams, height: Option<u64>) -> Result<R>
    where
        R: DeserializeOwned,
    {
        let start = Instant::now();
        let response = timeout(
            self.options.request_timeout,
            self.client.request::<serde_json::Value, _>(method, params),
        )
        .await;

        let (outcome, result) = match response {
            Err(_) => (
                CallOutcome::TimedOut,
                Err(RpcError::Timeout { method }),
            ),
            Ok(Err(err)) => {
                let mapped = map_rpc_error(method, height, err);
                let outcome = match mapped {
                    RpcError::HeightNotFound { .. } => CallOutcome::AboveHead,
                    RpcError::Timeout { .. } => CallOutcome::TimedOut,
                    _ => CallOutcome::Failed,
                };
                (outcome, Err(mapped))
            }
            Ok(Ok(value)) => (CallOutcome::Answered, Ok(value)),
        };
        self.metrics.record(outcome, start.elapsed());
        let value = result?;

        serde_json::from_value(value).map_err(|err| match height {
            Some(height) => inconsistent(height, format!("malformed {method} response: {err}")),
            None => anyhow!("failed to decode {method} response: {err}"),
        })
    }
}

fn inconsistent(height: u64, reason: String) -> anyhow::Error {
    RpcError::Inconsistent { height, reason }.into()
}

fn map_rpc_error(method: &'static str, height: Option<u64>, err: JsonRpcError) -> RpcError {
    match err {
        JsonRpcError::RequestTimeout => RpcError::Timeout { method },
        JsonRpcError::Call(call) => match height {
            Some(height) if is_height_above_head(call.message()) => {
                RpcError::HeightNotFound { height }
            }
            _ => RpcError::Transport {
                method,
                message: format!("code={}, message={}", call.code(), call.message()),
            },
        },
        other => RpcError::Transport {
            method,
            message: other.to_string(),
        },
    }
}
