//! Wiring of the whole ingestion path, from the HTTP gateway down to the store

use std::sync::Arc;

use anyhow::Result;
use tokio::{net::TcpListener, spawn, task::JoinHandle};

use crate::{
    broker::{LogBroker, QueueBroker},
    consumer::{PoolStats, Processor, WorkerPool},
    core::{config::Config, shutdown::Shutdown},
    gateway::{self, Gateway},
    store::IdempotencyStore,
    transport::{LogTransport, QueueTransport, RpcTransport, Transport, TransportClient},
    writer,
};

pub struct Listeners {
    pub gateway: TcpListener,
    pub kafka_writer: TcpListener,
    pub rabbit_writer: TcpListener,
}

impl Listeners {
    pub async fn bind(cfg: &Config) -> Result<Self> {
        let bind = |addr| async move {
            TcpListener::bind(addr)
                .await
                .map_err(|e| anyhow!("failed to bind {addr}: {e}"))
        };
        Ok(Self {
            gateway: bind(cfg.gateway.listen).await?,
            kafka_writer: bind(cfg.kafka.listen).await?,
            rabbit_writer: bind(cfg.rabbit.listen).await?,
        })
    }
}

pub struct Pipeline {
    pub log_broker: LogBroker,
    pub queue_broker: QueueBroker,
    pools: Vec<(Transport, Arc<PoolStats>, JoinHandle<Arc<PoolStats>>)>,
}

impl Pipeline {
    /// start every task. they all stop when `shutdown` is triggered
    pub async fn start(
        cfg: &Config,
        listeners: Listeners,
        store: Arc<dyn IdempotencyStore>,
        shutdown: &Shutdown,
    ) -> Result<Self> {
        let log_broker = LogBroker::with_retention(cfg.kafka.retain_messages);
        log_broker
            .create_topic(&cfg.kafka.topic, cfg.kafka.partitions)
            .await;
        let queue_broker = QueueBroker::new();
        queue_broker.declare_queue(&cfg.rabbit.queue).await?;

        let writers: [(TcpListener, Arc<dyn TransportClient>); 2] = [
            (
                listeners.kafka_writer,
                Arc::new(LogTransport::new(log_broker.clone(), &cfg.kafka.topic)),
            ),
            (
                listeners.rabbit_writer,
                Arc::new(QueueTransport::new(queue_broker.clone(), &cfg.rabbit.queue)),
            ),
        ];
        for (listener, client) in writers {
            let handle = shutdown.handle();
            spawn(async move {
                if let Err(e) = writer::serve(listener, client, handle).await {
                    error!("writer exited with error: {e:?}");
                }
            });
        }

        let pool = |transport| {
            WorkerPool::new(
                transport,
                cfg.consumer.workers,
                cfg.consumer.buffer,
                cfg.consumer.message_timeout(),
                Processor::new(store.clone(), cfg.store.ttl(), cfg.consumer.store_timeout()),
            )
        };
        let mut pools = vec![];
        let kafka_pool = pool(Transport::Kafka);
        let reader = log_broker
            .reader(&cfg.kafka.topic, &cfg.kafka.group)
            .await?;
        pools.push((
            Transport::Kafka,
            kafka_pool.stats(),
            spawn(kafka_pool.run(reader, shutdown.handle())),
        ));
        let rabbit_pool = pool(Transport::Rabbit);
        let consumer = queue_broker.consume(&cfg.rabbit.queue).await?;
        pools.push((
            Transport::Rabbit,
            rabbit_pool.stats(),
            spawn(rabbit_pool.run(consumer, shutdown.handle())),
        ));

        let clients = cfg
            .gateway
            .order
            .iter()
            .map(|&transport| {
                Arc::new(RpcTransport::new(
                    transport,
                    cfg.gateway.writer_addr(transport),
                    cfg.gateway.connect_timeout(),
                    cfg.gateway.call_timeout(),
                )) as Arc<dyn TransportClient>
            })
            .collect::<Vec<_>>();
        let gateway = Arc::new(Gateway::new(clients, cfg.gateway.fanout)?);
        debug!("gateway fan-out is {:?}", gateway.fanout());
        let handle = shutdown.handle();
        spawn(async move {
            if let Err(e) = gateway::http::serve(listeners.gateway, gateway, handle).await {
                error!("gateway exited with error: {e:?}");
            }
        });

        Ok(Self {
            log_broker,
            queue_broker,
            pools,
        })
    }

    #[cfg(test)]
    pub fn stats(&self, transport: Transport) -> Option<Arc<PoolStats>> {
        self.pools
            .iter()
            .find(|(t, ..)| *t == transport)
            .map(|(_, stats, _)| stats.clone())
    }

    /// wait for the consumer pools to finish (call once shutdown is triggered)
    pub async fn drain(self) {
        for (transport, _, pool) in self.pools {
            if let Err(e) = pool.await {
                error!("[{transport}] consumer pool failed: {e:?}");
            }
        }
        self.log_broker.close().await;
        self.queue_broker.close().await;
    }
}
