//! Consuming one transport's stream into the idempotency store

use crate::broker::BrokerError;

pub mod dedup;
pub mod pool;
pub mod stream;

pub use dedup::Processor;
pub use pool::{PoolStats, WorkerPool};

/// where a message sits in its stream, if the stream can say
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageIdentity {
    /// log streams: stable across redelivery
    Position { partition: u32, offset: u64 },
    /// queue streams: assigned by the publisher, carried on every delivery
    MessageId(String),
    None,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub payload: Vec<u8>,
    pub identity: MessageIdentity,
}

#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error("stream closed")]
    Closed,
    #[error("stream read failed: {0}")]
    Broker(BrokerError),
}

impl From<BrokerError> for ReadError {
    fn from(e: BrokerError) -> Self {
        match e {
            BrokerError::Closed => Self::Closed,
            other => Self::Broker(other),
        }
    }
}

/// A source of messages, read by the dispatch loop of a `WorkerPool`.
///
/// `next` must be cancel safe: if the returned future is dropped before completing, no message
/// has been consumed.
#[async_trait]
pub trait StreamReader: Send {
    async fn next(&mut self) -> Result<Message, ReadError>;
    /// for logging
    fn describe(&self) -> String;
}
