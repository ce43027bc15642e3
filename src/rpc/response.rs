//! Typed views over the Tendermint2 `status`, `block` and `block_results`
//! responses. Only the fields the ingester reads are modelled.

use crate::rpc::helpers::deserialize_height;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub(crate) struct StatusResponse {
    pub sync_info: SyncInfo,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SyncInfo {
    #[serde(deserialize_with = "deserialize_height")]
    pub latest_block_height: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct BlockResponse {
    pub block_meta: BlockMeta,
    pub block: BlockBody,
}

#[derive(Debug, Deserialize)]
pub(crate) struct BlockMeta {
    pub block_id: BlockId,
}

#[derive(Debug, Deserialize)]
pub(crate) struct BlockId {
    #[serde(default)]
    pub hash: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct BlockBody {
    pub header: Header,
    #[serde(default)]
    pub data: BlockData,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Header {
    pub chain_id: String,
    #[serde(deserialize_with = "deserialize_height")]
    pub height: u64,
    pub time: String,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct BlockData {
    #[serde(default)]
    pub txs: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct BlockResultsResponse {
    #[serde(deserialize_with = "deserialize_height")]
    pub height: u64,
    pub results: ResultsBody,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ResultsBody {
    #[serde(default)]
    pub deliver_tx: Option<Vec<serde_json::Value>>,
}
