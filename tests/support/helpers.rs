use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{bail, Result};
use once_cell::sync::Lazy;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;
use tx_indexer::{Event, EventPublisher, Fetcher, FetcherConfig, FetcherConfigBuilder, Topic};

static TRACING_SUBSCRIBER: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
});

pub fn init_tracing() {
    Lazy::force(&TRACING_SUBSCRIBER);
}

/// Builder preloaded with timings small enough for tests.
pub fn fast_config(remote: &str) -> FetcherConfigBuilder {
    FetcherConfig::builder()
        .remote(remote)
        .max_slots(2)
        .max_chunk_size(4)
        .rpc_timeout(Duration::from_secs(2))
        .idle_backoff(Duration::from_millis(10))
        .head_refresh_interval(Duration::from_millis(20))
        .metrics_interval(Duration::from_millis(50))
        .fetch_max_attempts(2)
        .fetch_backoff(Duration::from_millis(1), Duration::from_millis(4))
        .storage_max_attempts(3)
        .storage_backoff(Duration::from_millis(1), Duration::from_millis(4))
}

pub async fn wait_for_height(fetcher: &Fetcher, target: u64, timeout: Duration) -> Result<()> {
    let start = Instant::now();
    loop {
        let current = fetcher.last_committed_height();
        if let Some(height) = current {
            if height >= target {
                return Ok(());
            }
        }
        if start.elapsed() > timeout {
            let reported = current
                .map(|height| height.to_string())
                .unwrap_or_else(|| "<none>".to_owned());
            bail!(
                "fetcher did not reach height {target} within {:?} (last committed: {reported})",
                timeout
            );
        }
        sleep(Duration::from_millis(10)).await;
    }
}

pub fn assert_is_contiguous(heights: &[u64], first: u64, last: u64) {
    let expected: Vec<u64> = (first..=last).collect();
    assert_eq!(
        heights, expected,
        "expected contiguous heights {first}..={last}, got {heights:?}"
    );
}

/// Collects the heights of `topic` events until `count` have arrived.
pub fn collect_heights(
    publisher: &Arc<EventPublisher>,
    topic: Topic,
    count: usize,
) -> JoinHandle<Vec<u64>> {
    collect_events(publisher, topic, count, |_| {})
}

/// Like [`collect_heights`] but runs `inspect` on each event as it arrives.
pub fn collect_events<F>(
    publisher: &Arc<EventPublisher>,
    topic: Topic,
    count: usize,
    mut inspect: F,
) -> JoinHandle<Vec<u64>>
where
    F: FnMut(&Event) + Send + 'static,
{
    let mut subscription = publisher.subscribe(topic);
    tokio::spawn(async move {
        let mut heights = Vec::with_capacity(count);
        while heights.len() < count {
            match subscription.recv().await {
                Some(event) => {
                    inspect(&event);
                    heights.push(event.height());
                }
                None => break,
            }
        }
        heights
    })
}
