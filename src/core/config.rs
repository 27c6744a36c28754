use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Result;
use serde::Deserialize;

use crate::{gateway::Fanout, transport::Transport};

#[cfg(test)]
#[test]
fn load_example_config() {
    let cfg = from_str(include_str!("../../config.example.toml")).unwrap();
    assert_eq!(cfg.consumer.workers, 4);
    assert_eq!(cfg.consumer.buffer, 100);
    assert_eq!(cfg.gateway.order, vec![Transport::Rabbit, Transport::Kafka]);
    assert_eq!(cfg.store.ttl(), Duration::from_secs(7 * 24 * 60 * 60));
}

#[cfg(test)]
#[test]
fn defaults_fill_missing_sections() {
    let cfg = from_str(
        r#"
        [directory]
        data = "/tmp/clima/data"
        run = "/tmp/clima/run"
        "#,
    )
    .unwrap();
    assert_eq!(cfg.gateway.fanout, Fanout::Sequential);
    assert_eq!(cfg.kafka.topic, "clima-topic");
    assert_eq!(cfg.kafka.partitions, 3);
    assert_eq!(cfg.kafka.retain_messages, 1000);
    assert_eq!(cfg.rabbit.queue, "clima-queue");
    assert_eq!(cfg.log.level, "info");
}

#[cfg(test)]
#[test]
fn order_must_name_both_transports() {
    let res = from_str(
        r#"
        [directory]
        data = "d"
        run = "r"
        [gateway]
        order = ["kafka", "kafka"]
        "#,
    );
    assert!(res.is_err());
}

#[cfg(test)]
#[test]
fn zero_periods_are_rejected() {
    for (section, key) in [
        ("store", "autosave_secs"),
        ("store", "ttl_secs"),
        ("consumer", "message_timeout_ms"),
        ("consumer", "store_timeout_ms"),
    ] {
        let res = from_str(&format!(
            r#"
            [directory]
            data = "d"
            run = "r"
            [{section}]
            {key} = 0
            "#
        ));
        let err = res.expect_err(key).to_string();
        assert!(err.contains(key), "{err}");
    }
}

pub fn from_str(buf: &str) -> Result<Config> {
    let cfg: Config = config::Config::builder()
        .add_source(config::File::from_str(buf, config::FileFormat::Toml))
        .build()?
        .try_deserialize()?;
    cfg.validate()?;
    Ok(cfg)
}

pub fn open_blocking(path: &Path) -> Result<Config> {
    info!("Reading configuration from {:?}", path);
    if !path.exists() {
        bail!("Configuration file {path:?} does not exist!");
    }
    let buf = std::fs::read_to_string(path)?;
    from_str(&buf)
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Config {
    /// directories to store various things
    pub directory: Directories,
    #[serde(default)]
    pub log: Log,
    /// the http front and its fan-out
    #[serde(default)]
    pub gateway: Gateway,
    /// log-based transport (writer + consumer)
    #[serde(default)]
    pub kafka: Kafka,
    /// queue-based transport (writer + consumer)
    #[serde(default)]
    pub rabbit: Rabbit,
    #[serde(default)]
    pub consumer: Consumer,
    #[serde(default)]
    pub store: Store,
}

impl Config {
    fn validate(&self) -> Result<()> {
        let mut order = self.gateway.order.clone();
        order.sort();
        order.dedup();
        if order.len() != 2 || self.gateway.order.len() != 2 {
            bail!(
                "gateway.order must list each transport exactly once (got {:?})",
                self.gateway.order
            );
        }
        if self.consumer.workers == 0 {
            bail!("consumer.workers must be at least 1");
        }
        if self.consumer.buffer == 0 {
            bail!("consumer.buffer must be at least 1");
        }
        if self.kafka.partitions == 0 {
            bail!("kafka.partitions must be at least 1");
        }
        if self.store.ttl_secs == 0 {
            bail!("store.ttl_secs must be at least 1");
        }
        if self.store.autosave_secs == 0 {
            bail!("store.autosave_secs must be at least 1");
        }
        if self.consumer.message_timeout_ms == 0 {
            bail!("consumer.message_timeout_ms must be at least 1");
        }
        if self.consumer.store_timeout_ms == 0 {
            bail!("consumer.store_timeout_ms must be at least 1");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Directories {
    /// the directory to store persistant data (the store snapshot)
    pub data: PathBuf,
    /// the directory to store runtime information (must be
    /// able to delete this *between* server runs, with no consequence)
    ///
    /// e.g. log files, daemon PID files
    pub run: PathBuf,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Log {
    /// default filter directive, `RUST_LOG` takes precedence
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for Log {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Gateway {
    #[serde(default = "default_gateway_listen")]
    pub listen: SocketAddr,
    #[serde(default)]
    pub fanout: Fanout,
    /// order in which the transports are called (and errors reported)
    #[serde(default = "default_order")]
    pub order: Vec<Transport>,
    /// address of the kafka writer service
    #[serde(default = "default_kafka_listen")]
    pub kafka_writer: SocketAddr,
    /// address of the rabbit writer service
    #[serde(default = "default_rabbit_listen")]
    pub rabbit_writer: SocketAddr,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
}

impl Gateway {
    pub fn writer_addr(&self, transport: Transport) -> SocketAddr {
        match transport {
            Transport::Kafka => self.kafka_writer,
            Transport::Rabbit => self.rabbit_writer,
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

impl Default for Gateway {
    fn default() -> Self {
        Self {
            listen: default_gateway_listen(),
            fanout: Fanout::default(),
            order: default_order(),
            kafka_writer: default_kafka_listen(),
            rabbit_writer: default_rabbit_listen(),
            connect_timeout_ms: default_connect_timeout_ms(),
            call_timeout_ms: default_call_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Kafka {
    /// where the kafka writer service listens
    #[serde(default = "default_kafka_listen")]
    pub listen: SocketAddr,
    #[serde(default = "default_topic")]
    pub topic: String,
    #[serde(default = "default_partitions")]
    pub partitions: u32,
    /// consumer group the log consumer commits under
    #[serde(default = "default_group")]
    pub group: String,
    /// messages kept per partition once every group has read them
    #[serde(default = "default_retain_messages")]
    pub retain_messages: u64,
}

impl Default for Kafka {
    fn default() -> Self {
        Self {
            listen: default_kafka_listen(),
            topic: default_topic(),
            partitions: default_partitions(),
            group: default_group(),
            retain_messages: default_retain_messages(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Rabbit {
    /// where the rabbit writer service listens
    #[serde(default = "default_rabbit_listen")]
    pub listen: SocketAddr,
    #[serde(default = "default_queue")]
    pub queue: String,
}

impl Default for Rabbit {
    fn default() -> Self {
        Self {
            listen: default_rabbit_listen(),
            queue: default_queue(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Consumer {
    /// number of workers per transport
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// capacity of the buffer between the stream reader and the workers
    #[serde(default = "default_buffer")]
    pub buffer: usize,
    #[serde(default = "default_message_timeout_ms")]
    pub message_timeout_ms: u64,
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
}

impl Consumer {
    pub fn message_timeout(&self) -> Duration {
        Duration::from_millis(self.message_timeout_ms)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

impl Default for Consumer {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            buffer: default_buffer(),
            message_timeout_ms: default_message_timeout_ms(),
            store_timeout_ms: default_store_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Store {
    /// lifetime of a stored record
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    /// how often the store is swept of expired records and saved to disk
    #[serde(default = "default_autosave_secs")]
    pub autosave_secs: u64,
}

impl Store {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn autosave(&self) -> Duration {
        Duration::from_secs(self.autosave_secs)
    }
}

impl Default for Store {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            autosave_secs: default_autosave_secs(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_gateway_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_order() -> Vec<Transport> {
    vec![Transport::Rabbit, Transport::Kafka]
}

fn default_kafka_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 50052))
}

fn default_rabbit_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 50051))
}

fn default_connect_timeout_ms() -> u64 {
    2_000
}

fn default_call_timeout_ms() -> u64 {
    10_000
}

fn default_topic() -> String {
    "clima-topic".to_string()
}

fn default_partitions() -> u32 {
    3
}

fn default_group() -> String {
    "clima-consumer-group".to_string()
}

fn default_retain_messages() -> u64 {
    crate::broker::log::DEFAULT_RETAIN
}

fn default_queue() -> String {
    "clima-queue".to_string()
}

fn default_workers() -> usize {
    4
}

fn default_buffer() -> usize {
    100
}

fn default_message_timeout_ms() -> u64 {
    30_000
}

fn default_store_timeout_ms() -> u64 {
    5_000
}

fn default_ttl_secs() -> u64 {
    7 * 24 * 60 * 60
}

fn default_autosave_secs() -> u64 {
    30
}
