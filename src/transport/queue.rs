use relay::{Observation, Outcome};
use uuid::Uuid;

use super::{Transport, TransportClient, TransportError};
use crate::broker::{queue::DEFAULT_EXCHANGE, BrokerError, Properties, QueueBroker};

pub const CONTENT_TYPE_JSON: &str = "application/json";

/// publishes observations to a queue through the default exchange.
///
/// publishing is not mandatory: if the queue does not exist the broker drops
/// the message and this still reports success.
#[derive(Debug, Clone)]
pub struct QueueTransport {
    broker: QueueBroker,
    queue: String,
}

impl QueueTransport {
    pub fn new(broker: QueueBroker, queue: impl Into<String>) -> Self {
        Self {
            broker,
            queue: queue.into(),
        }
    }
}

#[async_trait]
impl TransportClient for QueueTransport {
    fn transport(&self) -> Transport {
        Transport::Rabbit
    }

    #[instrument(skip(self), fields(queue = %self.queue))]
    async fn publish(&self, record: &Observation) -> Result<Outcome, TransportError> {
        let body = record.to_payload()?;
        let properties = Properties {
            content_type: Some(CONTENT_TYPE_JSON.to_string()),
            message_id: Some(Uuid::new_v4().to_string()),
        };
        match self
            .broker
            .publish(DEFAULT_EXCHANGE, &self.queue, false, properties, body)
            .await
        {
            Ok(()) => {
                info!("[rabbit] published {record:?}");
                Ok(Outcome::ok("published to rabbit"))
            }
            Err(BrokerError::Closed) => Err(TransportError::Closed),
            Err(e) => {
                warn!("[rabbit] publish rejected: {e}");
                Ok(Outcome::failed(format!("error publishing to rabbit: {e}")))
            }
        }
    }
}
