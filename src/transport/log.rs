use relay::{Observation, Outcome};

use super::{Transport, TransportClient, TransportError};
use crate::broker::{BrokerError, LogBroker};

/// appends observations to a topic of the log broker
#[derive(Debug, Clone)]
pub struct LogTransport {
    broker: LogBroker,
    topic: String,
}

impl LogTransport {
    pub fn new(broker: LogBroker, topic: impl Into<String>) -> Self {
        Self {
            broker,
            topic: topic.into(),
        }
    }
}

#[async_trait]
impl TransportClient for LogTransport {
    fn transport(&self) -> Transport {
        Transport::Kafka
    }

    #[instrument(skip(self), fields(topic = %self.topic))]
    async fn publish(&self, record: &Observation) -> Result<Outcome, TransportError> {
        let payload = record.to_payload()?;
        match self.broker.append(&self.topic, payload).await {
            Ok((partition, offset)) => {
                info!(partition, offset, "[kafka] published {record:?}");
                Ok(Outcome::ok("published to kafka"))
            }
            Err(BrokerError::Closed) => Err(TransportError::Closed),
            Err(e) => {
                warn!("[kafka] publish rejected: {e}");
                Ok(Outcome::failed(format!("error publishing to kafka: {e}")))
            }
        }
    }
}

#[cfg(test)]
mod test {
    use relay::Observation;

    use super::LogTransport;
    use crate::{
        broker::LogBroker,
        transport::{TransportClient, TransportError},
    };

    #[tokio::test]
    async fn appends_json_payload() {
        let broker = LogBroker::new();
        broker.create_topic("clima-topic", 1).await;
        let transport = LogTransport::new(broker.clone(), "clima-topic");
        let obs = Observation::new("lluvia", "Guatemala", "rain");
        let outcome = transport.publish(&obs).await.unwrap();
        assert!(outcome.success);

        let mut reader = broker.reader("clima-topic", "g").await.unwrap();
        let msg = reader.read_message().await.unwrap();
        assert_eq!(Observation::from_payload(&msg.value).unwrap(), obs);
    }

    #[tokio::test]
    async fn rejection_is_an_outcome() {
        let broker = LogBroker::new();
        let transport = LogTransport::new(broker, "not-created");
        let outcome = transport.publish(&Observation::default()).await.unwrap();
        assert!(!outcome.success);
        assert!(outcome.info.contains("not-created"));
    }

    #[tokio::test]
    async fn closed_broker_is_an_error() {
        let broker = LogBroker::new();
        broker.create_topic("t", 1).await;
        broker.close().await;
        let transport = LogTransport::new(broker, "t");
        assert!(matches!(
            transport.publish(&Observation::default()).await,
            Err(TransportError::Closed)
        ));
    }
}
