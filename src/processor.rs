//! Processor orchestration covering the fetcher, lifecycle management, chain
//! head tracking, and worker pool coordination.

pub mod backoff;
pub mod fetcher;
pub mod head;
pub mod lifecycle;
pub mod worker_pool;
