//! JSON-RPC client plumbing: the chain client contract, the Tendermint2
//! implementation, metrics and payload decoding helpers.

pub mod client;
pub mod helpers;
pub mod metrics;
pub mod options;
mod response;

pub use client::{Client, RpcError, TmRpcClient};
pub use metrics::RpcMetricsSnapshot;
pub use options::RpcClientOptions;
