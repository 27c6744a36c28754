//! Publishing one observation to a named transport

use std::{fmt, net::SocketAddr};

use relay::{Observation, Outcome, RpcError};
use serde::{Deserialize, Serialize};

pub mod log;
pub mod queue;
pub mod rpc;

pub use self::log::LogTransport;
pub use queue::QueueTransport;
pub use rpc::RpcTransport;

/// The two transports an observation is replicated to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// log-based broker
    Kafka,
    /// queue-based broker
    Rabbit,
}

impl Transport {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Kafka => "kafka",
            Self::Rabbit => "rabbit",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Failure to make a publish attempt at all.
///
/// A transport that was reached but refused the record reports that through
/// `Outcome { success: false, .. }` instead.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("publish rpc failed: {0}")]
    Rpc(#[from] RpcError),
    #[error("writer could not publish: {0}")]
    Remote(String),
    #[error("{0} timed out")]
    Timeout(&'static str),
    #[error("failed to encode observation: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("broker connection is closed")]
    Closed,
}

impl TransportError {
    /// true when the transport could not be reached at all
    pub fn is_connect(&self) -> bool {
        matches!(self, Self::Connect { .. } | Self::Closed)
    }
}

#[async_trait]
pub trait TransportClient: Send + Sync {
    fn transport(&self) -> Transport;
    /// make exactly one attempt to publish `record`
    async fn publish(&self, record: &Observation) -> Result<Outcome, TransportError>;
}
