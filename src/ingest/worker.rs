//! Fetch worker split across focused submodules:
//! - `types`: retry policy and per-chunk outcomes
//! - `shared`: handles every worker of a run holds
//! - `process`: worker struct plus the claim/submit loop
//! - `fetch`: chunk and height fetching against the chain client
//! - `tests`: worker unit tests

mod fetch;
mod process;
mod shared;
mod types;


pub use process::Worker;
pub use shared::{WorkerShared, WorkerSharedParams};
pub use types::FetchRetryPolicy;
