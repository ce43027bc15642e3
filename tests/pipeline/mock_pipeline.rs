use std::sync::Arc;
use std::time::Duration;

use crate::support::{
    helpers::{
        assert_is_contiguous, collect_events, collect_heights, fast_config, init_tracing,
        wait_for_height,
    },
    mock_client::MockClient,
    storage::FailingTxStorage,
};
use anyhow::Result;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tx_indexer::{tx_hash, EventPublisher, Fetcher, MemoryStorage, StorageError, StorageOp, Topic};

/// `MockClient` ignores the endpoint; the config still needs a valid one.
const UNUSED_REMOTE: &str = "http://127.0.0.1:26657";

fn expected_tx_count(first: u64, last: u64) -> usize {
    (first..=last).map(MockClient::txs_per_block).sum()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn commits_every_height_in_order_and_publishes_after_commit() -> Result<()> {
    init_tracing();
    let client = Arc::new(MockClient::new(10));
    let storage = Arc::new(MemoryStorage::new());
    let publisher = Arc::new(EventPublisher::new());
    let config = fast_config(UNUSED_REMOTE).build()?;

    let observed = storage.clone();
    let blocks = collect_events(&publisher, Topic::NewBlock, 10, move |event| {
        assert!(
            observed.block(event.height()).is_some(),
            "event for height {} arrived before its commit",
            event.height()
        );
    });
    let txs = collect_heights(&publisher, Topic::NewTransaction, expected_tx_count(1, 10));

    let mut fetcher = Fetcher::new(config, storage.clone(), client.clone(), publisher.clone());
    fetcher.start().await?;
    wait_for_height(&fetcher, 10, Duration::from_secs(5)).await?;
    fetcher.stop().await?;

    assert_is_contiguous(&storage.heights(), 1, 10);
    assert_eq!(storage.tx_count(), expected_tx_count(1, 10));

    let block_heights = timeout(Duration::from_secs(1), blocks).await??;
    assert_is_contiguous(&block_heights, 1, 10);
    let tx_heights = timeout(Duration::from_secs(1), txs).await??;
    assert!(tx_heights.windows(2).all(|pair| pair[0] <= pair[1]));

    // Ten heights, chunks of four, two slots: every height is fetched once.
    for height in 1..=10 {
        assert_eq!(client.block_calls(height), 1, "height {height} refetched");
    }
    let planner = fetcher.planner().expect("planner of the finished run");
    assert_eq!(planner.cursor(), 11);
    assert!(planner.claimed().is_empty());

    let tx = storage
        .tx_by_hash(&tx_hash(b"tx-3-1"))
        .expect("second tx of height 3 indexed by hash");
    assert_eq!((tx.height, tx.index), (3, 1));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn many_slots_fetch_each_height_exactly_once() -> Result<()> {
    init_tracing();
    let client = Arc::new(MockClient::new(200));
    let storage = Arc::new(MemoryStorage::new());
    let config = fast_config(UNUSED_REMOTE)
        .max_slots(8)
        .max_chunk_size(7)
        .build()?;

    let mut fetcher = Fetcher::new(
        config,
        storage.clone(),
        client.clone(),
        Arc::new(EventPublisher::new()),
    );
    fetcher.start().await?;
    assert_eq!(fetcher.active_workers(), 8);
    wait_for_height(&fetcher, 200, Duration::from_secs(10)).await?;
    fetcher.stop().await?;
    assert_eq!(fetcher.active_workers(), 0);

    assert_is_contiguous(&storage.heights(), 1, 200);
    assert_eq!(storage.block_writes(), 200);
    assert!((1..=200).all(|height| client.block_calls(height) == 1));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn repeatedly_failing_chunk_is_released_and_reclaimed() -> Result<()> {
    init_tracing();
    let client = Arc::new(MockClient::new(10));
    client.fail_block(6, 5);
    let storage = Arc::new(MemoryStorage::new());
    let config = fast_config(UNUSED_REMOTE).build()?;

    let mut fetcher = Fetcher::new(
        config,
        storage.clone(),
        client.clone(),
        Arc::new(EventPublisher::new()),
    );
    fetcher.start().await?;
    wait_for_height(&fetcher, 10, Duration::from_secs(5)).await?;
    fetcher.stop().await?;

    assert_is_contiguous(&storage.heights(), 1, 10);
    let snapshot = fetcher.telemetry().snapshot();
    assert_eq!(snapshot.fetch_errors, 5);
    assert!(
        snapshot.released_chunks >= 2,
        "two attempts per claim means at least two releases, got {}",
        snapshot.released_chunks
    );
    assert_eq!(client.block_calls(6), 6);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn restart_resumes_above_the_latest_committed_height() -> Result<()> {
    init_tracing();
    let client = Arc::new(MockClient::new(10));
    let storage = Arc::new(MemoryStorage::new());
    let config = fast_config(UNUSED_REMOTE).build()?;

    let mut first = Fetcher::new(
        config.clone(),
        storage.clone(),
        client.clone(),
        Arc::new(EventPublisher::new()),
    );
    first.start().await?;
    wait_for_height(&first, 10, Duration::from_secs(5)).await?;
    first.stop().await?;

    client.set_head(15);
    let publisher = Arc::new(EventPublisher::new());
    let resumed = collect_heights(&publisher, Topic::NewBlock, 5);
    let mut second = Fetcher::new(config, storage.clone(), client.clone(), publisher);
    second.start().await?;
    assert_eq!(second.last_committed_height(), Some(10));
    wait_for_height(&second, 15, Duration::from_secs(5)).await?;
    second.stop().await?;

    assert_is_contiguous(&storage.heights(), 1, 15);
    assert_eq!(storage.block_writes(), 15);
    assert!((1..=10).all(|height| client.block_calls(height) == 1));
    assert_is_contiguous(&timeout(Duration::from_secs(1), resumed).await??, 11, 15);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn storage_exhaustion_aborts_the_pipeline() -> Result<()> {
    init_tracing();
    let client = Arc::new(MockClient::new(10));
    let storage = Arc::new(FailingTxStorage::new(3));
    let publisher = Arc::new(EventPublisher::new());
    let mut blocks = publisher.subscribe(Topic::NewBlock);
    let config = fast_config(UNUSED_REMOTE).build()?;

    let root = CancellationToken::new();
    let mut fetcher = Fetcher::with_cancellation_token(
        config,
        storage.clone(),
        client,
        publisher.clone(),
        root.clone(),
    );
    fetcher.start().await?;
    timeout(Duration::from_secs(5), root.cancelled())
        .await
        .expect("fatal storage error should cancel the root token");

    let err = fetcher
        .stop()
        .await
        .expect_err("storage exhaustion should surface from stop");
    let message = format!("{err:#}");
    assert!(
        message.contains("ingestion pipeline aborted"),
        "unexpected error: {message}"
    );

    let storage_error = err
        .chain()
        .find_map(|cause| cause.downcast_ref::<StorageError>())
        .expect("StorageError in the chain");
    assert_eq!(storage_error.height, 3);
    assert_eq!(storage_error.op, StorageOp::SaveTx { index: 0 });
    assert_eq!(storage_error.attempts, 3);
    assert_eq!(storage.failed_attempts(), 3);

    assert_eq!(fetcher.last_committed_height(), Some(2));
    let mut published = Vec::new();
    while let Ok(event) = blocks.try_recv() {
        published.push(event.height());
    }
    assert_eq!(published, vec![1, 2], "no event may follow the failed height");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn restart_after_storage_abort_rewrites_the_failed_height() -> Result<()> {
    init_tracing();
    let client = Arc::new(MockClient::new(6));
    let storage = Arc::new(FailingTxStorage::new(3));
    let publisher = Arc::new(EventPublisher::new());
    let config = fast_config(UNUSED_REMOTE).build()?;

    let root = CancellationToken::new();
    let mut fetcher = Fetcher::with_cancellation_token(
        config.clone(),
        storage.clone(),
        client.clone(),
        publisher.clone(),
        root.clone(),
    );
    fetcher.start().await?;
    timeout(Duration::from_secs(5), root.cancelled())
        .await
        .expect("fatal storage error should cancel the root token");
    fetcher
        .stop()
        .await
        .expect_err("storage exhaustion should surface from stop");

    // Height 3 has its block but none of its txs.
    assert!(storage.inner().block(3).is_some());
    assert!(storage.inner().txs_at(3).is_empty());
    assert_eq!(storage.inner().latest_height(), Some(2));

    storage.recover();
    let blocks = collect_heights(&publisher, Topic::NewBlock, 4);
    let mut restarted = Fetcher::new(config, storage.clone(), client, publisher.clone());
    restarted.start().await?;
    wait_for_height(&restarted, 6, Duration::from_secs(5)).await?;
    restarted.stop().await?;

    assert_eq!(
        storage.inner().txs_at(3).len(),
        MockClient::txs_per_block(3),
        "height 3 must be rewritten with its txs"
    );
    assert_eq!(storage.inner().tx_count(), expected_tx_count(1, 6));
    assert_is_contiguous(&storage.inner().heights(), 1, 6);
    let block_heights = timeout(Duration::from_secs(1), blocks).await??;
    assert_is_contiguous(&block_heights, 3, 6);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stalled_subscriber_does_not_hold_back_ingestion() -> Result<()> {
    init_tracing();
    let client = Arc::new(MockClient::new(12));
    let storage = Arc::new(MemoryStorage::new());
    let publisher = Arc::new(EventPublisher::with_capacity(2));
    let mut stalled = publisher.subscribe(Topic::NewBlock);
    let mut healthy = publisher.subscribe(Topic::NewBlock);
    let healthy_id = healthy.id();
    let reader = tokio::spawn(async move {
        let mut heights = Vec::new();
        while let Some(event) = healthy.recv().await {
            heights.push(event.height());
        }
        (heights, healthy.dropped())
    });

    let config = fast_config(UNUSED_REMOTE).build()?;
    let mut fetcher = Fetcher::new(config, storage.clone(), client, publisher.clone());
    fetcher.start().await?;
    wait_for_height(&fetcher, 12, Duration::from_secs(5)).await?;
    fetcher.stop().await?;
    assert_is_contiguous(&storage.heights(), 1, 12);

    assert_eq!(stalled.dropped(), 10);
    assert_eq!(stalled.try_recv().map(|event| event.height()).ok(), Some(1));
    assert_eq!(stalled.try_recv().map(|event| event.height()).ok(), Some(2));
    assert!(matches!(stalled.try_recv(), Err(TryRecvError::Empty)));

    assert!(publisher.unsubscribe(healthy_id));
    let (heights, dropped) = timeout(Duration::from_secs(1), reader).await??;
    assert_eq!(heights.len() as u64 + dropped, 12);
    assert!(heights.windows(2).all(|pair| pair[0] < pair[1]));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn late_subscribers_only_see_new_heights() -> Result<()> {
    init_tracing();
    let client = Arc::new(MockClient::new(5));
    let publisher = Arc::new(EventPublisher::new());
    let config = fast_config(UNUSED_REMOTE).build()?;

    let mut fetcher = Fetcher::new(
        config,
        Arc::new(MemoryStorage::new()),
        client.clone(),
        publisher.clone(),
    );
    fetcher.start().await?;
    wait_for_height(&fetcher, 5, Duration::from_secs(5)).await?;

    let mut late = publisher.subscribe(Topic::NewBlock);
    assert!(matches!(late.try_recv(), Err(TryRecvError::Empty)));

    client.set_head(8);
    wait_for_height(&fetcher, 8, Duration::from_secs(5)).await?;
    fetcher.stop().await?;

    let mut heights = Vec::new();
    while let Ok(event) = late.try_recv() {
        heights.push(event.height());
    }
    assert_is_contiguous(&heights, 6, 8);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn node_behind_its_advertised_head_is_transient() -> Result<()> {
    init_tracing();
    let client = Arc::new(MockClient::new(10));
    client.set_available(6);
    let storage = Arc::new(MemoryStorage::new());
    let config = fast_config(UNUSED_REMOTE).build()?;

    let mut fetcher = Fetcher::new(
        config,
        storage.clone(),
        client.clone(),
        Arc::new(EventPublisher::new()),
    );
    fetcher.start().await?;
    wait_for_height(&fetcher, 4, Duration::from_secs(5)).await?;
    sleep(Duration::from_millis(100)).await;

    // [5, 8] cannot be served as a whole yet.
    assert_eq!(fetcher.last_committed_height(), Some(4));
    assert!(fetcher.is_running());
    let snapshot = fetcher.telemetry().snapshot();
    assert_eq!(snapshot.fetch_errors, 0);
    assert!(snapshot.released_chunks >= 1);

    client.set_available(10);
    wait_for_height(&fetcher, 10, Duration::from_secs(5)).await?;
    fetcher.stop().await?;
    assert_is_contiguous(&storage.heights(), 1, 10);
    Ok(())
}
