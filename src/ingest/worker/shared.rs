use super::types::FetchRetryPolicy;
use crate::ingest::chunk_buffer::ChunkBuffer;
use crate::ingest::planner::ChunkPlanner;
use crate::rpc::Client;
use crate::runtime::telemetry::Telemetry;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct WorkerShared {
    pub(super) planner: Arc<ChunkPlanner>,
    pub(super) buffer: Arc<ChunkBuffer>,
    pub(super) client: Arc<dyn Client>,
    pub(super) telemetry: Arc<Telemetry>,
    pub(super) retry: FetchRetryPolicy,
    pub(super) idle_backoff: Duration,
}

pub struct WorkerSharedParams {
    pub planner: Arc<ChunkPlanner>,
    pub buffer: Arc<ChunkBuffer>,
    pub client: Arc<dyn Client>,
    pub telemetry: Arc<Telemetry>,
    pub retry: FetchRetryPolicy,
    pub idle_backoff: Duration,
}

impl WorkerShared {
    pub fn new(params: WorkerSharedParams) -> Self {
        Self {
            planner: params.planner,
            buffer: params.buffer,
            client: params.client,
            telemetry: params.telemetry,
            retry: params.retry,
            idle_backoff: params.idle_backoff,
        }
    }
}
