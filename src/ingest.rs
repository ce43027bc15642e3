//! Ingestion core: chunk planning, fetching, ordered buffering and commit.

pub mod block;
pub mod chunk;
pub mod chunk_buffer;
pub mod planner;
pub mod sequencer;
pub mod worker;
