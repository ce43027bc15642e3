//! Transport limits for [`super::TmRpcClient`].

use anyhow::{ensure, Result};
use std::time::Duration;

/// `block` responses embed every transaction, so the response limit is far
/// larger than the request limit.
const DEFAULT_RESPONSE_LIMIT_BYTES: usize = 64 * 1024 * 1024;
const DEFAULT_REQUEST_LIMIT_BYTES: usize = 64 * 1024;
const DEFAULT_IN_FLIGHT: usize = 256;
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct RpcClientOptions {
    /// Deadline applied to every JSON-RPC call.
    pub request_timeout: Duration,
    /// Calls allowed in flight on the shared HTTP client.
    pub max_concurrent_requests: usize,
    pub max_request_body_bytes: usize,
    pub max_response_body_bytes: usize,
}

impl Default for RpcClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_concurrent_requests: DEFAULT_IN_FLIGHT,
            max_request_body_bytes: DEFAULT_REQUEST_LIMIT_BYTES,
            max_response_body_bytes: DEFAULT_RESPONSE_LIMIT_BYTES,
        }
    }
}

impl RpcClientOptions {
    /// Sizes the in-flight limit for `slots` concurrent workers, each of
    /// which has at most one call outstanding.
    pub fn for_slots(slots: usize, request_timeout: Duration) -> Self {
        Self {
            request_timeout,
            max_concurrent_requests: slots.saturating_mul(2).max(32),
            ..Self::default()
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        ensure!(
            !self.request_timeout.is_zero(),
            "request_timeout must be greater than 0"
        );
        let limits = [
            ("max_concurrent_requests", self.max_concurrent_requests),
            ("max_request_body_bytes", self.max_request_body_bytes),
            ("max_response_body_bytes", self.max_response_body_bytes),
        ];
        for (name, value) in limits {
            ensure!(value > 0, "{name} must be greater than 0");
        }
        Ok(())
    }
}
