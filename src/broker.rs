//! In-process message brokers backing the two transports.
//!
//! [`LogBroker`] behaves like a partitioned log (topics, partitions, offsets, consumer group
//! positions), [`QueueBroker`] like a queue broker with only the default exchange. Both are
//! cheap to clone and safe to share between tasks.

pub mod log;
pub mod queue;

pub use self::log::{LogBroker, LogReader};
pub use queue::{Properties, QueueBroker, QueueConsumer};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    #[error("unknown topic `{0}`")]
    UnknownTopic(String),
    #[error("partition {partition} does not exist in topic `{topic}`")]
    UnknownPartition { topic: String, partition: u32 },
    #[error("offset {offset} is not retained in partition {partition} of topic `{topic}`")]
    OffsetOutOfRange {
        topic: String,
        partition: u32,
        offset: u64,
    },
    #[error("unknown queue `{0}`")]
    UnknownQueue(String),
    #[error("unknown exchange `{0}`")]
    UnknownExchange(String),
    #[error("no queue bound for routing key `{0}`")]
    Unroutable(String),
    #[error("broker is closed")]
    Closed,
}
