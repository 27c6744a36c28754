use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};

use tokio::sync::{Mutex, Notify};

use super::BrokerError;

/// the only exchange this broker knows, routing by queue name
pub const DEFAULT_EXCHANGE: &str = "";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    pub content_type: Option<String>,
    /// publisher assigned identity, carried unchanged across redelivery
    pub message_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// per-consumer sequence number
    pub delivery_tag: u64,
    pub redelivered: bool,
    pub properties: Properties,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone)]
struct Message {
    properties: Properties,
    body: Vec<u8>,
    redelivered: bool,
}

#[derive(Debug, Default)]
struct State {
    queues: HashMap<String, VecDeque<Message>>,
    closed: bool,
}

#[derive(Debug, Default)]
struct Inner {
    state: Mutex<State>,
    published: Notify,
}

#[derive(Debug, Clone, Default)]
pub struct QueueBroker {
    inner: Arc<Inner>,
}

impl QueueBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// declare `name`, bound to the default exchange. no-op if it already exists
    pub async fn declare_queue(&self, name: &str) -> Result<(), BrokerError> {
        let mut state = self.inner.state.lock().await;
        if state.closed {
            return Err(BrokerError::Closed);
        }
        state.queues.entry(name.to_string()).or_insert_with(|| {
            debug!(queue = name, "declaring queue");
            VecDeque::new()
        });
        Ok(())
    }

    /// Publish `body` through `exchange`.
    ///
    /// When no queue matches `routing_key` the message is dropped without an error,
    /// unless `mandatory` is set.
    pub async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        mandatory: bool,
        properties: Properties,
        body: Vec<u8>,
    ) -> Result<(), BrokerError> {
        let mut state = self.inner.state.lock().await;
        if state.closed {
            return Err(BrokerError::Closed);
        }
        if exchange != DEFAULT_EXCHANGE {
            return Err(BrokerError::UnknownExchange(exchange.to_string()));
        }
        let Some(queue) = state.queues.get_mut(routing_key) else {
            if mandatory {
                return Err(BrokerError::Unroutable(routing_key.to_string()));
            }
            trace!(routing_key, "dropping unroutable message");
            return Ok(());
        };
        queue.push_back(Message {
            properties,
            body,
            redelivered: false,
        });
        drop(state);
        self.inner.published.notify_waiters();
        Ok(())
    }

    /// start an auto-acknowledging consumer on `queue`
    pub async fn consume(&self, queue: &str) -> Result<QueueConsumer, BrokerError> {
        let state = self.inner.state.lock().await;
        if !state.queues.contains_key(queue) {
            return Err(BrokerError::UnknownQueue(queue.to_string()));
        }
        Ok(QueueConsumer {
            broker: self.clone(),
            queue: queue.to_string(),
            next_tag: 1,
        })
    }

    /// messages waiting in `queue`
    #[cfg(test)]
    pub async fn depth(&self, queue: &str) -> Option<usize> {
        self.inner
            .state
            .lock()
            .await
            .queues
            .get(queue)
            .map(VecDeque::len)
    }

    pub async fn close(&self) {
        self.inner.state.lock().await.closed = true;
        self.inner.published.notify_waiters();
    }
}

#[derive(Debug)]
pub struct QueueConsumer {
    broker: QueueBroker,
    queue: String,
    next_tag: u64,
}

impl QueueConsumer {
    /// wait for the next message. it is acknowledged (removed from the queue) on delivery
    pub async fn next_delivery(&mut self) -> Result<Delivery, BrokerError> {
        loop {
            let notified = self.broker.inner.published.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut state = self.broker.inner.state.lock().await;
                if state.closed {
                    return Err(BrokerError::Closed);
                }
                let queue = state
                    .queues
                    .get_mut(&self.queue)
                    .ok_or_else(|| BrokerError::UnknownQueue(self.queue.clone()))?;
                if let Some(msg) = queue.pop_front() {
                    let delivery_tag = self.next_tag;
                    self.next_tag += 1;
                    return Ok(Delivery {
                        delivery_tag,
                        redelivered: msg.redelivered,
                        properties: msg.properties,
                        body: msg.body,
                    });
                }
            }
            notified.await;
        }
    }

    /// return a delivery to the head of the queue, flagged as redelivered
    #[cfg(test)]
    pub async fn requeue(&mut self, delivery: Delivery) -> Result<(), BrokerError> {
        let mut state = self.broker.inner.state.lock().await;
        let queue = state
            .queues
            .get_mut(&self.queue)
            .ok_or_else(|| BrokerError::UnknownQueue(self.queue.clone()))?;
        queue.push_front(Message {
            properties: delivery.properties,
            body: delivery.body,
            redelivered: true,
        });
        drop(state);
        self.broker.inner.published.notify_waiters();
        Ok(())
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }
}

#[cfg(test)]
mod test {
    use super::{BrokerError, Properties, QueueBroker, DEFAULT_EXCHANGE};

    fn props(id: &str) -> Properties {
        Properties {
            content_type: Some("application/json".into()),
            message_id: Some(id.into()),
        }
    }

    #[tokio::test]
    async fn default_exchange_routes_by_queue_name() {
        let broker = QueueBroker::new();
        broker.declare_queue("q").await.unwrap();
        broker
            .publish(DEFAULT_EXCHANGE, "q", false, props("1"), b"a".to_vec())
            .await
            .unwrap();
        broker
            .publish(DEFAULT_EXCHANGE, "q", false, props("2"), b"b".to_vec())
            .await
            .unwrap();
        let mut consumer = broker.consume("q").await.unwrap();
        let first = consumer.next_delivery().await.unwrap();
        let second = consumer.next_delivery().await.unwrap();
        assert_eq!((first.delivery_tag, first.body.as_slice()), (1, &b"a"[..]));
        assert_eq!((second.delivery_tag, second.body.as_slice()), (2, &b"b"[..]));
        assert_eq!(first.properties, props("1"));
        assert_eq!(broker.depth("q").await, Some(0));
    }

    #[tokio::test]
    async fn unroutable_dropped_unless_mandatory() {
        let broker = QueueBroker::new();
        broker.declare_queue("q").await.unwrap();
        broker
            .publish(DEFAULT_EXCHANGE, "nowhere", false, props("1"), vec![])
            .await
            .unwrap();
        assert_eq!(broker.depth("q").await, Some(0));
        assert_eq!(
            broker
                .publish(DEFAULT_EXCHANGE, "nowhere", true, props("1"), vec![])
                .await,
            Err(BrokerError::Unroutable("nowhere".into()))
        );
        assert_eq!(
            broker.publish("amq.topic", "q", false, props("1"), vec![]).await,
            Err(BrokerError::UnknownExchange("amq.topic".into()))
        );
    }

    #[tokio::test]
    async fn requeue_keeps_identity() {
        let broker = QueueBroker::new();
        broker.declare_queue("q").await.unwrap();
        broker
            .publish(DEFAULT_EXCHANGE, "q", false, props("abc"), b"x".to_vec())
            .await
            .unwrap();
        let mut consumer = broker.consume("q").await.unwrap();
        let delivery = consumer.next_delivery().await.unwrap();
        assert!(!delivery.redelivered);
        consumer.requeue(delivery.clone()).await.unwrap();
        let again = consumer.next_delivery().await.unwrap();
        assert!(again.redelivered);
        assert_eq!(again.properties.message_id, delivery.properties.message_id);
        assert_ne!(again.delivery_tag, delivery.delivery_tag);
    }

    #[tokio::test]
    async fn closed_broker() {
        let broker = QueueBroker::new();
        broker.declare_queue("q").await.unwrap();
        let mut consumer = broker.consume("q").await.unwrap();
        broker.close().await;
        assert_eq!(consumer.next_delivery().await, Err(BrokerError::Closed));
        assert_eq!(
            broker
                .publish(DEFAULT_EXCHANGE, "q", false, props("1"), vec![])
                .await,
            Err(BrokerError::Closed)
        );
        assert!(broker.consume("missing").await.is_err());
    }
}
