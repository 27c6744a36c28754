//! Fan-out of one observation to every transport.
//!
//! Each call makes exactly one attempt per transport, and always makes all of them. A transport
//! that could not be reached fails the whole call (the first such transport, in the configured
//! order, is reported) while a transport that was reached but refused the record only shows up
//! as `success: false` in its outcome.

use std::sync::Arc;

use futures::future::join_all;
use relay::{Observation, Outcome};
use serde::{Deserialize, Serialize};

use crate::transport::{Transport, TransportClient, TransportError};

pub mod http;

/// how the per-transport calls of one publish are issued
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Fanout {
    /// one after the other, in the configured order
    #[default]
    Sequential,
    /// all at once
    Concurrent,
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("error publishing to {transport}: {source}")]
    Transport {
        transport: Transport,
        source: TransportError,
    },
    #[error("no client configured for {0}")]
    MissingTransport(Transport),
}

/// the per-transport outcomes of one publish
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishResponse {
    pub kafka: Outcome,
    pub rabbit: Outcome,
}

pub struct Gateway {
    clients: Vec<Arc<dyn TransportClient>>,
    fanout: Fanout,
}

impl Gateway {
    /// `clients` are called (and their errors reported) in the order given
    pub fn new(clients: Vec<Arc<dyn TransportClient>>, fanout: Fanout) -> Result<Self, GatewayError> {
        for transport in [Transport::Kafka, Transport::Rabbit] {
            if !clients.iter().any(|c| c.transport() == transport) {
                return Err(GatewayError::MissingTransport(transport));
            }
        }
        Ok(Self { clients, fanout })
    }

    pub fn fanout(&self) -> Fanout {
        self.fanout
    }

    #[instrument(skip(self), fields(fanout = ?self.fanout))]
    pub async fn publish(&self, record: &Observation) -> Result<PublishResponse, GatewayError> {
        let results = match self.fanout {
            Fanout::Sequential => {
                let mut results = Vec::with_capacity(self.clients.len());
                for client in &self.clients {
                    results.push(client.publish(record).await);
                }
                results
            }
            Fanout::Concurrent => join_all(self.clients.iter().map(|c| c.publish(record))).await,
        };

        let mut kafka = None;
        let mut rabbit = None;
        let mut first_err = None;
        for (client, res) in self.clients.iter().zip(results) {
            let transport = client.transport();
            match res {
                Ok(outcome) => {
                    if !outcome.success {
                        warn!("{transport} rejected the record: {}", outcome.info);
                    }
                    match transport {
                        Transport::Kafka => kafka = Some(outcome),
                        Transport::Rabbit => rabbit = Some(outcome),
                    }
                }
                Err(source) => {
                    if source.is_connect() {
                        error!("{transport} is unreachable: {source}");
                    } else {
                        error!("failed to publish to {transport}: {source:?}");
                    }
                    if first_err.is_none() {
                        first_err = Some(GatewayError::Transport { transport, source });
                    }
                }
            }
        }
        if let Some(e) = first_err {
            return Err(e);
        }
        Ok(PublishResponse {
            kafka: kafka.ok_or(GatewayError::MissingTransport(Transport::Kafka))?,
            rabbit: rabbit.ok_or(GatewayError::MissingTransport(Transport::Rabbit))?,
        })
    }
}

#[cfg(test)]
pub(crate) mod test {
    use std::{
        io,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
    };

    use relay::{Observation, Outcome};

    use super::{Fanout, Gateway, GatewayError};
    use crate::transport::{Transport, TransportClient, TransportError};

    #[derive(Debug, Clone, Copy)]
    pub enum Behaviour {
        Accept,
        Reject,
        Unreachable,
    }

    /// a transport that records how often it was called
    pub struct Mock {
        pub transport: Transport,
        pub behaviour: Behaviour,
        pub calls: AtomicUsize,
    }

    impl Mock {
        pub fn new(transport: Transport, behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                transport,
                behaviour,
                calls: AtomicUsize::new(0),
            })
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TransportClient for Mock {
        fn transport(&self) -> Transport {
            self.transport
        }

        async fn publish(&self, _record: &Observation) -> Result<Outcome, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behaviour {
                Behaviour::Accept => Ok(Outcome::ok(format!("published to {}", self.transport))),
                Behaviour::Reject => Ok(Outcome::failed("queue full")),
                Behaviour::Unreachable => Err(TransportError::Connect {
                    addr: ([127, 0, 0, 1], 1).into(),
                    source: io::ErrorKind::ConnectionRefused.into(),
                }),
            }
        }
    }

    pub fn gateway(rabbit: &Arc<Mock>, kafka: &Arc<Mock>, fanout: Fanout) -> Gateway {
        let clients: Vec<Arc<dyn TransportClient>> = vec![rabbit.clone(), kafka.clone()];
        Gateway::new(clients, fanout).unwrap()
    }

    fn obs() -> Observation {
        Observation::new("lluvia", "Guatemala", "rain")
    }

    #[tokio::test]
    async fn one_attempt_per_transport() {
        for fanout in [Fanout::Sequential, Fanout::Concurrent] {
            let rabbit = Mock::new(Transport::Rabbit, Behaviour::Accept);
            let kafka = Mock::new(Transport::Kafka, Behaviour::Accept);
            let res = gateway(&rabbit, &kafka, fanout)
                .publish(&obs())
                .await
                .unwrap();
            assert_eq!(res.kafka, Outcome::ok("published to kafka"));
            assert_eq!(res.rabbit, Outcome::ok("published to rabbit"));
            assert_eq!((rabbit.calls(), kafka.calls()), (1, 1));
        }
    }

    #[tokio::test]
    async fn rejection_is_not_an_error() {
        let rabbit = Mock::new(Transport::Rabbit, Behaviour::Reject);
        let kafka = Mock::new(Transport::Kafka, Behaviour::Accept);
        let res = gateway(&rabbit, &kafka, Fanout::Sequential)
            .publish(&obs())
            .await
            .unwrap();
        assert!(!res.rabbit.success);
        assert!(res.kafka.success);
    }

    #[tokio::test]
    async fn unreachable_transport_still_attempts_the_other() {
        for fanout in [Fanout::Sequential, Fanout::Concurrent] {
            let rabbit = Mock::new(Transport::Rabbit, Behaviour::Unreachable);
            let kafka = Mock::new(Transport::Kafka, Behaviour::Accept);
            let err = gateway(&rabbit, &kafka, fanout)
                .publish(&obs())
                .await
                .unwrap_err();
            assert!(matches!(
                err,
                GatewayError::Transport {
                    transport: Transport::Rabbit,
                    ..
                }
            ));
            assert!(err.to_string().starts_with("error publishing to rabbit: "));
            assert_eq!((rabbit.calls(), kafka.calls()), (1, 1));
        }
    }

    #[tokio::test]
    async fn first_failure_in_order_is_reported() {
        let rabbit = Mock::new(Transport::Rabbit, Behaviour::Unreachable);
        let kafka = Mock::new(Transport::Kafka, Behaviour::Unreachable);
        let clients: Vec<Arc<dyn TransportClient>> = vec![kafka.clone(), rabbit.clone()];
        let err = Gateway::new(clients, Fanout::Concurrent)
            .unwrap()
            .publish(&obs())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GatewayError::Transport {
                transport: Transport::Kafka,
                ..
            }
        ));
    }

    #[test]
    fn both_transports_required() {
        let kafka: Arc<dyn TransportClient> = Mock::new(Transport::Kafka, Behaviour::Accept);
        assert!(matches!(
            Gateway::new(vec![kafka], Fanout::Sequential),
            Err(GatewayError::MissingTransport(Transport::Rabbit))
        ));
    }
}
