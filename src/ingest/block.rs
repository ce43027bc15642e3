use crate::rpc::RpcError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Block fetched from the remote node.
///
/// `hash` is kept in the encoding the node reports it in. `raw` carries the
/// node's full `block` response so query endpoints can serve it verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub height: u64,
    pub hash: String,
    pub chain_id: String,
    pub time: String,
    #[serde(with = "base64_txs")]
    pub txs: Vec<Vec<u8>>,
    #[serde(default)]
    pub raw: serde_json::Value,
}

impl Block {
    pub fn num_txs(&self) -> usize {
        self.txs.len()
    }
}

/// Execution outcome of a single transaction, keyed by its block height and
/// position inside the block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxResult {
    pub height: u64,
    pub index: u32,
    pub hash: String,
    #[serde(with = "base64_bytes")]
    pub tx: Vec<u8>,
    pub response: serde_json::Value,
}

/// Raw `block_results` payload for one height.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BlockResults {
    pub height: u64,
    pub deliver_tx: Vec<serde_json::Value>,
}

/// Lower-case hex SHA-256 of the transaction bytes.
pub fn tx_hash(tx: &[u8]) -> String {
    hex::encode(Sha256::digest(tx))
}

/// A block paired with its ordered transaction results.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedBlock {
    block: Block,
    txs: Vec<TxResult>,
}

impl FetchedBlock {
    /// Pairs a block with its execution results.
    ///
    /// Fails with [`RpcError::Inconsistent`] when the results describe a
    /// different height or a different number of transactions.
    pub fn assemble(block: Block, results: BlockResults) -> Result<Self, RpcError> {
        if results.height != block.height {
            return Err(RpcError::Inconsistent {
                height: block.height,
                reason: format!("block_results reported height {}", results.height),
            });
        }

        if results.deliver_tx.len() != block.txs.len() {
            return Err(RpcError::Inconsistent {
                height: block.height,
                reason: format!(
                    "block carries {} txs but block_results carries {}",
                    block.txs.len(),
                    results.deliver_tx.len()
                ),
            });
        }

        let height = block.height;
        let txs = block
            .txs
            .iter()
            .zip(results.deliver_tx)
            .enumerate()
            .map(|(index, (tx, response))| TxResult {
                height,
                index: index as u32,
                hash: tx_hash(tx),
                tx: tx.clone(),
                response,
            })
            .collect();

        Ok(Self { block, txs })
    }

    pub fn height(&self) -> u64 {
        self.block.height
    }

    pub fn block(&self) -> &Block {
        &self.block
    }

    pub fn txs(&self) -> &[TxResult] {
        &self.txs
    }

    pub fn into_parts(self) -> (Block, Vec<TxResult>) {
        (self.block, self.txs)
    }
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(D::Error::custom)
    }
}

mod base64_txs {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::ser::SerializeSeq;
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(txs: &[Vec<u8>], serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(txs.len()))?;
        for tx in txs {
            seq.serialize_element(&STANDARD.encode(tx))?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<Vec<u8>>, D::Error> {
        let encoded = Vec::<String>::deserialize(deserializer)?;
        encoded
            .iter()
            .map(|tx| STANDARD.decode(tx).map_err(D::Error::custom))
            .collect()
    }
}
