//! Decoding helpers for Tendermint2 JSON-RPC payloads: heights that arrive as
//! strings or numbers, and base64 transaction lists.

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{de, Deserialize, Deserializer};

/// Message fragment Tendermint2 nodes use when a height is above the head.
const HEIGHT_ABOVE_HEAD: &str = "must be less than or equal to";

/// Accepts `"42"` as well as `42`.
pub fn deserialize_height<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Height {
        Text(String),
        Number(u64),
    }

    match Height::deserialize(deserializer)? {
        Height::Number(value) => Ok(value),
        Height::Text(text) => text
            .trim()
            .parse::<u64>()
            .map_err(|err| de::Error::custom(format!("invalid height {text:?}: {err}"))),
    }
}

/// Decodes the base64 transactions of a block. A missing list means no txs.
pub fn decode_txs(encoded: Option<&[String]>) -> Result<Vec<Vec<u8>>> {
    encoded
        .unwrap_or_default()
        .iter()
        .enumerate()
        .map(|(index, tx)| {
            STANDARD
                .decode(tx.trim())
                .with_context(|| format!("tx {index} is not valid base64"))
        })
        .collect()
}

/// Whether a node error message reports a height beyond the chain head.
pub fn is_height_above_head(message: &str) -> bool {
    message.contains(HEIGHT_ABOVE_HEAD)
}
