use std::{
    convert::Infallible,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use hyper::service::{make_service_fn, service_fn};
use hyper::{body, Body, Method, Request, Response, Server, StatusCode};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub const CHAIN_ID: &str = "mock-tm2";

const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// Deterministic Tendermint2 chain served over JSON-RPC.
///
/// Height `h` carries `h % 3` transactions; heights arrive as strings the
/// way Tendermint2 encodes 64-bit integers.
#[derive(Clone)]
pub struct MockNode {
    head: Arc<AtomicU64>,
    requests: Arc<AtomicU64>,
}

impl MockNode {
    pub fn new(head: u64) -> Self {
        Self {
            head: Arc::new(AtomicU64::new(head)),
            requests: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn head(&self) -> u64 {
        self.head.load(Ordering::SeqCst)
    }

    pub fn set_head(&self, head: u64) {
        self.head.store(head, Ordering::SeqCst);
    }

    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn txs_at(height: u64) -> Vec<Vec<u8>> {
        (0..height % 3)
            .map(|index| format!("msg:{height}:{index}").into_bytes())
            .collect()
    }

    pub fn block_hash(height: u64) -> String {
        let mut bytes = [0u8; 32];
        bytes[..8].copy_from_slice(&height.to_be_bytes());
        bytes[31] = 0xab;
        STANDARD.encode(bytes)
    }

    fn status(&self) -> Value {
        let head = self.head();
        json!({
            "node_info": { "network": CHAIN_ID, "version": "mock" },
            "sync_info": {
                "latest_block_hash": Self::block_hash(head),
                "latest_block_height": head.to_string(),
                "latest_block_time": block_time(head),
                "catching_up": false
            }
        })
    }

    fn block(&self, height: u64) -> Value {
        let txs: Vec<String> = Self::txs_at(height)
            .iter()
            .map(|tx| STANDARD.encode(tx))
            .collect();
        let header = json!({
            "version": "v1.0.0",
            "chain_id": CHAIN_ID,
            "height": height.to_string(),
            "time": block_time(height),
            "num_txs": txs.len().to_string(),
            "total_txs": "0"
        });
        json!({
            "block_meta": {
                "block_id": { "hash": Self::block_hash(height), "parts": { "total": "1", "hash": null } },
                "header": header.clone()
            },
            "block": {
                "header": header,
                "data": { "txs": if txs.is_empty() { Value::Null } else { json!(txs) } },
                "last_commit": { "precommits": [] }
            }
        })
    }

    fn block_results(&self, height: u64) -> Value {
        let deliver: Vec<Value> = Self::txs_at(height)
            .iter()
            .enumerate()
            .map(|(index, _)| {
                json!({
                    "ResponseBase": { "Error": null, "Data": null, "Events": [], "Log": "", "Info": "" },
                    "GasWanted": "200000",
                    "GasUsed": (1000 + index).to_string()
                })
            })
            .collect();
        json!({
            "height": height.to_string(),
            "results": {
                "deliver_tx": if deliver.is_empty() { Value::Null } else { json!(deliver) },
                "end_block": { "ResponseBase": {} },
                "begin_block": { "ResponseBase": {} }
            }
        })
    }
}

fn block_time(height: u64) -> String {
    format!("2024-03-01T12:{:02}:{:02}Z", (height / 60) % 60, height % 60)
}

pub struct MockNodeServer {
    url: String,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl MockNodeServer {
    pub async fn start(node: MockNode) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("failed to bind mock node listener")?;
        let addr = listener
            .local_addr()
            .context("failed to read mock listener address")?;
        let std_listener = listener
            .into_std()
            .context("failed to convert mock listener")?;
        std_listener
            .set_nonblocking(true)
            .context("failed to set mock listener non-blocking")?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let make_service = make_service_fn(move |_| {
            let node = node.clone();
            async move { Ok::<_, Infallible>(service_fn(move |req| serve_request(node.clone(), req))) }
        });

        let server = Server::from_tcp(std_listener)
            .context("failed to build mock HTTP server")?
            .serve(make_service);
        let graceful = server.with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        });

        let handle = tokio::spawn(async move {
            if let Err(err) = graceful.await {
                eprintln!("mock node server stopped: {err}");
            }
        });

        Ok(Self {
            url: format!("http://{}", addr),
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Stops accepting connections and waits for open ones to finish.
    ///
    /// Connections a live client still keeps alive are cut after
    /// [`SHUTDOWN_GRACE`].
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(mut handle) = self.handle.take() {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut handle).await.is_err() {
                handle.abort();
            }
        }
    }
}

async fn serve_request(node: MockNode, req: Request<Body>) -> Result<Response<Body>, Infallible> {
    if req.method() != Method::POST {
        let mut response = Response::new(Body::from("Unsupported method"));
        *response.status_mut() = StatusCode::METHOD_NOT_ALLOWED;
        return Ok(response);
    }

    let bytes = match body::to_bytes(req.into_body()).await {
        Ok(bytes) => bytes,
        Err(err) => {
            let mut response = Response::new(Body::from(format!("failed to read body: {err}")));
            *response.status_mut() = StatusCode::BAD_REQUEST;
            return Ok(response);
        }
    };

    let payload: Value = match serde_json::from_slice(&bytes) {
        Ok(value) => value,
        Err(err) => {
            let mut response = Response::new(Body::from(format!("invalid JSON payload: {err}")));
            *response.status_mut() = StatusCode::BAD_REQUEST;
            return Ok(response);
        }
    };

    let response_value = match payload {
        Value::Array(calls) => {
            Value::Array(calls.into_iter().map(|call| handle_call(&node, call)).collect())
        }
        call => handle_call(&node, call),
    };

    let mut response = Response::new(Body::from(response_value.to_string()));
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("application/json"),
    );
    Ok(response)
}

fn handle_call(node: &MockNode, call: Value) -> Value {
    node.requests.fetch_add(1, Ordering::SeqCst);
    let id = call.get("id").cloned().unwrap_or(Value::Null);
    let method = call
        .get("method")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let params = call.get("params").cloned().unwrap_or(Value::Null);

    match method.as_str() {
        "status" => success(id, node.status()),
        "block" | "block_results" => {
            let Some(height) = height_param(&params) else {
                return error(id, -32602, "missing height parameter");
            };
            let head = node.head();
            if height > head {
                return error(
                    id,
                    -32603,
                    format!(
                        "height {height} must be less than or equal to the current blockchain height {head}"
                    ),
                );
            }
            if method == "block" {
                success(id, node.block(height))
            } else {
                success(id, node.block_results(height))
            }
        }
        _ => error(id, -32601, format!("unknown method {method}")),
    }
}

/// Reads the height from `["7"]`, `[7]` or `{"height": "7"}`.
fn height_param(params: &Value) -> Option<u64> {
    let raw = match params {
        Value::Array(values) => values.first()?,
        Value::Object(map) => map.get("height")?,
        _ => return None,
    };
    match raw {
        Value::String(text) => text.parse().ok(),
        other => other.as_u64(),
    }
}

fn success(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "result": result,
        "id": id,
    })
}

fn error(id: Value, code: i64, message: impl Into<String>) -> Value {
    json!({
        "jsonrpc": "2.0",
        "error": {
            "code": code,
            "message": message.into(),
        },
        "id": id,
    })
}
