pub mod events;
pub mod ingest;
pub mod processor;
pub mod rpc;
pub mod runtime;
pub mod storage;

pub use events::{
    Event, EventPayload, EventPublisher, Subscription, SubscriptionId, Topic,
    DEFAULT_SUBSCRIPTION_CAPACITY,
};
pub use ingest::block::{tx_hash, Block, BlockResults, FetchedBlock, TxResult};
pub use ingest::chunk::{ChunkRange, CompletedChunk};
pub use ingest::chunk_buffer::ChunkBuffer;
pub use ingest::planner::ChunkPlanner;
pub use ingest::sequencer::{Sequencer, SequencerParams, StorageRetryPolicy};
pub use ingest::worker::{FetchRetryPolicy, Worker};
pub use processor::fetcher::Fetcher;
pub use rpc::{Client, RpcClientOptions, RpcError, RpcMetricsSnapshot, TmRpcClient};
pub use runtime::config::{FetcherConfig, FetcherConfigBuilder, FetcherConfigParams};
pub use runtime::fatal::{FatalErrorHandler, FatalOrigin};
pub use runtime::progress::ProgressTracker;
pub use runtime::runner::Runner;
pub use runtime::telemetry::{init_tracing, Telemetry, TelemetrySnapshot};
pub use storage::{resume_height, MemoryStorage, Storage, StorageError, StorageOp};
