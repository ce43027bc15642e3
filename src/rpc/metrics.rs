//! Per-client call counters and latency.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// How one JSON-RPC call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CallOutcome {
    Answered,
    /// The node answered that the height is beyond its head. Not an error.
    AboveHead,
    TimedOut,
    Failed,
}

#[derive(Debug, Default)]
pub(crate) struct RpcMetrics {
    calls: AtomicU64,
    errors: AtomicU64,
    timeouts: AtomicU64,
    above_head: AtomicU64,
    latency_ns: AtomicU64,
    slowest_ns: AtomicU64,
}

impl RpcMetrics {
    pub(crate) fn record(&self, outcome: CallOutcome, latency: Duration) {
        let latency_ns = u64::try_from(latency.as_nanos()).unwrap_or(u64::MAX);
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.latency_ns.fetch_add(latency_ns, Ordering::Relaxed);
        self.slowest_ns.fetch_max(latency_ns, Ordering::Relaxed);

        match outcome {
            CallOutcome::Answered => {}
            CallOutcome::AboveHead => {
                self.above_head.fetch_add(1, Ordering::Relaxed);
            }
            CallOutcome::TimedOut => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                self.timeouts.fetch_add(1, Ordering::Relaxed);
            }
            CallOutcome::Failed => {
                self.errors.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub(crate) fn snapshot(&self) -> RpcMetricsSnapshot {
        let total_requests = self.calls.load(Ordering::Relaxed);
        let total_errors = self.errors.load(Ordering::Relaxed);
        let per_call = |total: f64| {
            if total_requests == 0 {
                0.0
            } else {
                total / total_requests as f64
            }
        };

        RpcMetricsSnapshot {
            total_requests,
            total_errors,
            average_latency_ms: per_call(self.latency_ns.load(Ordering::Relaxed) as f64)
                / 1_000_000.0,
            max_latency_ms: self.slowest_ns.load(Ordering::Relaxed) as f64 / 1_000_000.0,
            error_rate: per_call(total_errors as f64),
            total_timeouts: self.timeouts.load(Ordering::Relaxed),
            total_not_found: self.above_head.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Copy, Clone, Default)]
pub struct RpcMetricsSnapshot {
    pub total_requests: u64,
    pub total_errors: u64,
    pub average_latency_ms: f64,
    pub max_latency_ms: f64,
    pub error_rate: f64,
    pub total_timeouts: u64,
    /// Calls answered with "height above the chain head".
    pub total_not_found: u64,
}
