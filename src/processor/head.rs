//! Chain head tracking for the planner.

use crate::ingest::planner::ChunkPlanner;
use crate::rpc::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub(crate) struct HeadTracker;

impl HeadTracker {
    /// Queries the remote head once and feeds it to the planner.
    pub(crate) async fn refresh_once(client: &dyn Client, planner: &ChunkPlanner) -> Option<u64> {
        match client.get_latest_block_number().await {
            Ok(head) => {
                let previous = planner.head();
                if planner.observe_head(head) {
                    tracing::warn!(
                        observed = head,
                        previous = ?previous,
                        "chain head moved backwards; holding current plan"
                    );
                } else if previous != Some(head) {
                    tracing::debug!(head, "chain head advanced");
                }
                Some(head)
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to refresh chain head");
                None
            }
        }
    }

    pub(crate) fn spawn_refresh_loop(
        client: Arc<dyn Client>,
        planner: Arc<ChunkPlanner>,
        refresh_interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(refresh_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        break;
                    }
                    _ = ticker.tick() => {
                        tokio::select! {
                            _ = shutdown.cancelled() => break,
                            _ = Self::refresh_once(client.as_ref(), planner.as_ref()) => {}
                        }
                    }
                }
            }

            tracing::info!("chain head refresher stopped");
        })
    }
}
