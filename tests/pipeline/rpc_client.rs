use std::sync::Arc;
use std::time::Duration;

use crate::support::{
    helpers::{assert_is_contiguous, fast_config, init_tracing, wait_for_height},
    mock_node::{MockNode, MockNodeServer, CHAIN_ID},
};
use anyhow::Result;
use tx_indexer::{
    tx_hash, Client, EventPublisher, Fetcher, MemoryStorage, RpcClientOptions, RpcError,
    TmRpcClient,
};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reports_the_node_head_from_status() -> Result<()> {
    init_tracing();
    let node = MockNode::new(42);
    let server = MockNodeServer::start(node.clone()).await?;
    let client = TmRpcClient::new(server.url())?;

    assert_eq!(client.get_latest_block_number().await?, 42);
    node.set_head(43);
    assert_eq!(client.get_latest_block_number().await?, 43);

    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn decodes_blocks_and_their_results() -> Result<()> {
    init_tracing();
    let node = MockNode::new(10);
    let server = MockNodeServer::start(node.clone()).await?;
    let client = TmRpcClient::new(server.url())?;

    let block = client.block(5).await?;
    assert_eq!(block.height, 5);
    assert_eq!(block.chain_id, CHAIN_ID);
    assert_eq!(block.hash, MockNode::block_hash(5));
    assert_eq!(block.txs, MockNode::txs_at(5));
    assert_eq!(block.raw["block"]["header"]["height"], "5");

    let results = client.block_results(5).await?;
    assert_eq!(results.height, 5);
    assert_eq!(results.deliver_tx.len(), 2);
    assert_eq!(results.deliver_tx[1]["GasUsed"], "1001");

    // Height 3 carries no txs; the node sends `null` lists.
    let empty = client.block(3).await?;
    assert!(empty.txs.is_empty());
    assert!(client.block_results(3).await?.deliver_tx.is_empty());

    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn height_above_head_is_reported_as_not_found() -> Result<()> {
    init_tracing();
    let node = MockNode::new(10);
    let server = MockNodeServer::start(node).await?;
    let client = TmRpcClient::new(server.url())?;

    let err = client
        .get_block(11)
        .await
        .expect_err("height above the head must fail");
    match err.downcast_ref::<RpcError>() {
        Some(RpcError::HeightNotFound { height }) => assert_eq!(*height, 11),
        other => panic!("unexpected error: {other:?} ({err:#})"),
    }

    let metrics = client.metrics();
    assert_eq!(metrics.total_requests, 1);
    assert_eq!(metrics.total_not_found, 1);
    assert_eq!(metrics.total_errors, 0);

    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn records_request_metrics() -> Result<()> {
    init_tracing();
    let node = MockNode::new(6);
    let server = MockNodeServer::start(node.clone()).await?;
    let client = TmRpcClient::new(server.url())?;

    client.latest_block_number().await?;
    for height in 1..=4 {
        client.block(height).await?;
        client.block_results(height).await?;
    }

    let metrics = client.metrics();
    assert_eq!(metrics.total_requests, 9);
    assert_eq!(metrics.total_errors, 0);
    assert_eq!(metrics.error_rate, 0.0);
    assert_eq!(node.request_count(), 9);

    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unreachable_node_is_a_transient_failure() -> Result<()> {
    init_tracing();
    let options = RpcClientOptions {
        request_timeout: Duration::from_millis(500),
        ..RpcClientOptions::default()
    };
    let client = TmRpcClient::with_options("http://127.0.0.1:1", options)?;

    let err = client
        .get_latest_block_number()
        .await
        .expect_err("nothing listens on port 1");
    let rpc_error = err
        .downcast_ref::<RpcError>()
        .expect("failure is classified");
    assert!(
        matches!(rpc_error, RpcError::Transport { .. } | RpcError::Timeout { .. }),
        "unexpected error: {rpc_error:?}"
    );
    assert_eq!(client.metrics().total_errors, 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn indexes_a_node_end_to_end() -> Result<()> {
    init_tracing();
    let node = MockNode::new(9);
    let server = MockNodeServer::start(node.clone()).await?;
    let config = fast_config(server.url()).build()?;
    let client = Arc::new(TmRpcClient::from_config(&config)?);
    let storage = Arc::new(MemoryStorage::new());

    let mut fetcher = Fetcher::new(
        config,
        storage.clone(),
        client.clone(),
        Arc::new(EventPublisher::new()),
    );
    fetcher.start().await?;
    wait_for_height(&fetcher, 9, Duration::from_secs(5)).await?;
    fetcher.stop().await?;

    assert_is_contiguous(&storage.heights(), 1, 9);
    let expected_txs: usize = (1..=9).map(|height| MockNode::txs_at(height).len()).sum();
    assert_eq!(storage.tx_count(), expected_txs);

    let txs_at_eight = MockNode::txs_at(8);
    let second = &txs_at_eight[1];
    let stored = storage
        .tx_by_hash(&tx_hash(second))
        .expect("tx indexed by its hash");
    assert_eq!((stored.height, stored.index), (8, 1));
    assert_eq!(&stored.tx, second);
    assert_eq!(stored.response["GasUsed"], "1001");
    assert_eq!(
        storage.block(7).map(|block| block.hash),
        Some(MockNode::block_hash(7))
    );

    server.shutdown().await;
    Ok(())
}
