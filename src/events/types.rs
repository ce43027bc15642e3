use crate::ingest::block::{Block, TxResult};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    NewBlock,
    NewTransaction,
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::NewBlock => write!(f, "new_block"),
            Topic::NewTransaction => write!(f, "new_transaction"),
        }
    }
}

/// Payloads are shared so one committed record fans out without copies.
#[derive(Debug, Clone)]
pub enum EventPayload {
    Block(Arc<Block>),
    Transaction(Arc<TxResult>),
}

#[derive(Debug, Clone)]
pub struct Event {
    topic: Topic,
    height: u64,
    payload: EventPayload,
}

impl Event {
    pub fn new_block(block: Arc<Block>) -> Self {
        Self {
            topic: Topic::NewBlock,
            height: block.height,
            payload: EventPayload::Block(block),
        }
    }

    pub fn new_transaction(tx: Arc<TxResult>) -> Self {
        Self {
            topic: Topic::NewTransaction,
            height: tx.height,
            payload: EventPayload::Transaction(tx),
        }
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn payload(&self) -> &EventPayload {
        &self.payload
    }

    pub fn block(&self) -> Option<&Block> {
        match &self.payload {
            EventPayload::Block(block) => Some(block),
            EventPayload::Transaction(_) => None,
        }
    }

    pub fn transaction(&self) -> Option<&TxResult> {
        match &self.payload {
            EventPayload::Transaction(tx) => Some(tx),
            EventPayload::Block(_) => None,
        }
    }
}
