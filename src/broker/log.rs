use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};

use tokio::sync::{Mutex, Notify};

use super::BrokerError;

/// messages kept per partition behind the slowest consumer group, by default
pub const DEFAULT_RETAIN: u64 = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogMessage {
    pub partition: u32,
    pub offset: u64,
    pub value: Vec<u8>,
}

#[derive(Debug, Default)]
struct Partition {
    /// offset of the first retained message
    base: u64,
    messages: VecDeque<Vec<u8>>,
    /// bytes ever appended (used for balancing, not reduced by retention)
    bytes: u64,
}

impl Partition {
    /// offset the next appended message gets
    fn end(&self) -> u64 {
        self.base + self.messages.len() as u64
    }

    fn get(&self, offset: u64) -> Option<&Vec<u8>> {
        let idx = offset.checked_sub(self.base)?;
        self.messages.get(usize::try_from(idx).ok()?)
    }
}

#[derive(Debug, Default)]
struct Topic {
    partitions: Vec<Partition>,
    /// next offset to read, per partition, by consumer group
    groups: HashMap<String, Vec<u64>>,
}

impl Topic {
    /// partition holding the fewest bytes (lowest index wins ties)
    fn least_bytes(&self) -> usize {
        self.partitions
            .iter()
            .enumerate()
            .min_by_key(|(i, p)| (p.bytes, *i))
            .map(|(i, _)| i)
            .unwrap_or(0)
    }

    /// a groups positions, new groups start at the oldest retained message
    fn group_mut(&mut self, group: &str) -> &mut Vec<u64> {
        let bases = self.partitions.iter().map(|p| p.base).collect::<Vec<_>>();
        self.groups.entry(group.to_string()).or_insert(bases)
    }

    /// drop messages every group has read, keeping the last `retain` of each partition
    fn trim(&mut self, retain: u64) {
        for (i, partition) in self.partitions.iter_mut().enumerate() {
            let Some(committed) = self.groups.values().filter_map(|g| g.get(i).copied()).min()
            else {
                continue;
            };
            let floor = committed.min(partition.end().saturating_sub(retain));
            while partition.base < floor && partition.messages.pop_front().is_some() {
                partition.base += 1;
            }
        }
    }
}

#[derive(Debug, Default)]
struct State {
    topics: HashMap<String, Topic>,
    closed: bool,
}

#[derive(Debug)]
struct Inner {
    state: Mutex<State>,
    appended: Notify,
    retain: u64,
}

/// partitioned, append-only log
#[derive(Debug, Clone)]
pub struct LogBroker {
    inner: Arc<Inner>,
}

impl Default for LogBroker {
    fn default() -> Self {
        Self::with_retention(DEFAULT_RETAIN)
    }
}

impl LogBroker {
    #[cfg(test)]
    pub fn new() -> Self {
        Self::default()
    }

    /// a broker that keeps `retain` already consumed messages per partition, for `seek`ing back
    pub fn with_retention(retain: u64) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                appended: Notify::new(),
                retain,
            }),
        }
    }

    /// create `name` with `partitions` partitions. no-op if the topic exists
    pub async fn create_topic(&self, name: &str, partitions: u32) {
        let mut state = self.inner.state.lock().await;
        state.topics.entry(name.to_string()).or_insert_with(|| {
            debug!(topic = name, partitions, "creating topic");
            Topic {
                partitions: (0..partitions).map(|_| Partition::default()).collect(),
                groups: HashMap::new(),
            }
        });
    }

    /// append `value` to `topic`, returning where it was placed once it is stored
    pub async fn append(&self, topic: &str, value: Vec<u8>) -> Result<(u32, u64), BrokerError> {
        let mut state = self.inner.state.lock().await;
        if state.closed {
            return Err(BrokerError::Closed);
        }
        let t = state
            .topics
            .get_mut(topic)
            .ok_or_else(|| BrokerError::UnknownTopic(topic.to_string()))?;
        if t.partitions.is_empty() {
            return Err(BrokerError::UnknownPartition {
                topic: topic.to_string(),
                partition: 0,
            });
        }
        let idx = t.least_bytes();
        let partition = &mut t.partitions[idx];
        partition.bytes += value.len() as u64;
        let offset = partition.end();
        partition.messages.push_back(value);
        drop(state);
        self.inner.appended.notify_waiters();
        Ok((idx as u32, offset))
    }

    /// a reader that consumes `topic` as a member of `group`, starting from the groups
    /// committed positions
    pub async fn reader(&self, topic: &str, group: &str) -> Result<LogReader, BrokerError> {
        let mut state = self.inner.state.lock().await;
        let t = state
            .topics
            .get_mut(topic)
            .ok_or_else(|| BrokerError::UnknownTopic(topic.to_string()))?;
        t.group_mut(group);
        Ok(LogReader {
            broker: self.clone(),
            topic: topic.to_string(),
            group: group.to_string(),
            cursor: 0,
        })
    }

    /// offset the next message of each partition of `topic` will get
    #[cfg(test)]
    pub async fn high_watermarks(&self, topic: &str) -> Option<Vec<u64>> {
        let state = self.inner.state.lock().await;
        state
            .topics
            .get(topic)
            .map(|t| t.partitions.iter().map(Partition::end).collect())
    }

    /// offset of the oldest retained message of each partition of `topic`
    #[cfg(test)]
    pub async fn low_watermarks(&self, topic: &str) -> Option<Vec<u64>> {
        let state = self.inner.state.lock().await;
        state
            .topics
            .get(topic)
            .map(|t| t.partitions.iter().map(|p| p.base).collect())
    }

    /// refuse further appends, and wake blocked readers with `BrokerError::Closed`
    pub async fn close(&self) {
        self.inner.state.lock().await.closed = true;
        self.inner.appended.notify_waiters();
    }
}

/// Reads a topic as a consumer group member.
///
/// The group position is committed as each message is read, so a message handed out once is
/// not handed out again unless the reader `seek`s back over it.
#[derive(Debug)]
pub struct LogReader {
    broker: LogBroker,
    topic: String,
    group: String,
    /// partition to look at first on the next read
    cursor: usize,
}

impl LogReader {
    /// wait for, and return, the next unread message of any partition
    pub async fn read_message(&mut self) -> Result<LogMessage, BrokerError> {
        let inner = self.broker.inner.clone();
        loop {
            let notified = inner.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(msg) = self.try_read().await? {
                return Ok(msg);
            }
            notified.await;
        }
    }

    async fn try_read(&mut self) -> Result<Option<LogMessage>, BrokerError> {
        let mut state = self.broker.inner.state.lock().await;
        if state.closed {
            return Err(BrokerError::Closed);
        }
        let t = state
            .topics
            .get_mut(&self.topic)
            .ok_or_else(|| BrokerError::UnknownTopic(self.topic.clone()))?;
        let n = t.partitions.len();
        let ends = t.partitions.iter().map(Partition::end).collect::<Vec<_>>();
        let cursor = self.cursor;
        let found = {
            let positions = t.group_mut(&self.group);
            (0..n)
                .map(|i| (cursor + i) % n)
                .find(|&p| positions[p] < ends[p])
                .map(|p| {
                    let offset = positions[p];
                    positions[p] += 1;
                    (p, offset)
                })
        };
        let Some((partition, offset)) = found else {
            return Ok(None);
        };
        self.cursor = (partition + 1) % n;
        let value = t.partitions[partition]
            .get(offset)
            .cloned()
            .ok_or_else(|| BrokerError::OffsetOutOfRange {
                topic: self.topic.clone(),
                partition: partition as u32,
                offset,
            })?;
        t.trim(self.broker.inner.retain);
        Ok(Some(LogMessage {
            partition: partition as u32,
            offset,
            value,
        }))
    }

    /// move the groups position in `partition` back (or forward) to `offset`.
    /// messages from `offset` onwards are delivered again. `offset` must lie between the oldest
    /// retained message and the end of the partition
    #[cfg(test)]
    pub async fn seek(&mut self, partition: u32, offset: u64) -> Result<(), BrokerError> {
        let mut state = self.broker.inner.state.lock().await;
        let t = state
            .topics
            .get_mut(&self.topic)
            .ok_or_else(|| BrokerError::UnknownTopic(self.topic.clone()))?;
        if let Some(p) = t.partitions.get(partition as usize) {
            if offset < p.base || offset > p.end() {
                return Err(BrokerError::OffsetOutOfRange {
                    topic: self.topic.clone(),
                    partition,
                    offset,
                });
            }
        }
        let positions = t.group_mut(&self.group);
        let pos = positions
            .get_mut(partition as usize)
            .ok_or_else(|| BrokerError::UnknownPartition {
                topic: self.topic.clone(),
                partition,
            })?;
        *pos = offset;
        drop(state);
        self.broker.inner.appended.notify_waiters();
        Ok(())
    }

    /// the groups committed position (next offset to read) in each partition
    #[cfg(test)]
    pub async fn committed(&self) -> Vec<u64> {
        let mut state = self.broker.inner.state.lock().await;
        match state.topics.get_mut(&self.topic) {
            Some(t) => t.group_mut(&self.group).clone(),
            None => vec![],
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::{BrokerError, LogBroker};

    #[tokio::test]
    async fn least_bytes_balancing() {
        let broker = LogBroker::new();
        broker.create_topic("t", 3).await;
        assert_eq!(broker.append("t", vec![0; 10]).await.unwrap(), (0, 0));
        assert_eq!(broker.append("t", vec![0; 10]).await.unwrap(), (1, 0));
        assert_eq!(broker.append("t", vec![0; 5]).await.unwrap(), (2, 0));
        // partition 2 holds the fewest bytes
        assert_eq!(broker.append("t", vec![0; 1]).await.unwrap(), (2, 1));
        assert_eq!(broker.high_watermarks("t").await.unwrap(), vec![1, 1, 2]);
    }

    #[tokio::test]
    async fn unknown_topic() {
        let broker = LogBroker::new();
        assert_eq!(
            broker.append("missing", vec![1]).await,
            Err(BrokerError::UnknownTopic("missing".into()))
        );
        assert!(broker.reader("missing", "g").await.is_err());
    }

    #[tokio::test]
    async fn reader_commits_as_it_reads() {
        let broker = LogBroker::new();
        broker.create_topic("t", 2).await;
        for i in 0..4u8 {
            broker.append("t", vec![i]).await.unwrap();
        }
        let mut reader = broker.reader("t", "g").await.unwrap();
        let mut seen = vec![];
        for _ in 0..4 {
            let msg = reader.read_message().await.unwrap();
            seen.push(msg.value[0]);
        }
        seen.sort();
        assert_eq!(seen, vec![0, 1, 2, 3]);
        assert_eq!(reader.committed().await, vec![2, 2]);

        // a new reader in the same group resumes from the committed position
        let mut again = broker.reader("t", "g").await.unwrap();
        let pending =
            tokio::time::timeout(Duration::from_millis(20), again.read_message()).await;
        assert!(pending.is_err(), "group position was not shared");

        // other groups start from the beginning
        let mut other = broker.reader("t", "other").await.unwrap();
        assert_eq!(other.read_message().await.unwrap().offset, 0);
    }

    #[tokio::test]
    async fn seek_redelivers() {
        let broker = LogBroker::new();
        broker.create_topic("t", 1).await;
        broker.append("t", b"a".to_vec()).await.unwrap();
        broker.append("t", b"b".to_vec()).await.unwrap();
        let mut reader = broker.reader("t", "g").await.unwrap();
        let first = reader.read_message().await.unwrap();
        reader.read_message().await.unwrap();
        reader.seek(0, 0).await.unwrap();
        assert_eq!(reader.read_message().await.unwrap(), first);
        assert!(reader.seek(4, 0).await.is_err());
    }

    #[tokio::test]
    async fn blocked_reader_wakes_on_append_and_close() {
        let broker = LogBroker::new();
        broker.create_topic("t", 1).await;
        let mut reader = broker.reader("t", "g").await.unwrap();
        let task = tokio::spawn(async move {
            let msg = reader.read_message().await;
            (msg, reader.read_message().await)
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        broker.append("t", b"x".to_vec()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        broker.close().await;
        let (first, second) = task.await.unwrap();
        assert_eq!(first.unwrap().value, b"x");
        assert_eq!(second, Err(BrokerError::Closed));
        assert_eq!(broker.append("t", vec![]).await, Err(BrokerError::Closed));
    }

    #[tokio::test]
    async fn consumed_messages_are_trimmed() {
        let broker = LogBroker::with_retention(2);
        broker.create_topic("t", 1).await;
        for i in 0..5u8 {
            broker.append("t", vec![i]).await.unwrap();
        }
        let mut slow = broker.reader("t", "slow").await.unwrap();
        let mut fast = broker.reader("t", "fast").await.unwrap();
        for _ in 0..5 {
            fast.read_message().await.unwrap();
        }
        // the slow group has read nothing yet
        assert_eq!(broker.low_watermarks("t").await.unwrap(), vec![0]);

        for expected in 0..4u64 {
            assert_eq!(slow.read_message().await.unwrap().offset, expected);
        }
        // both groups are past 3, and the last 2 messages are kept
        assert_eq!(broker.low_watermarks("t").await.unwrap(), vec![3]);
        assert_eq!(broker.high_watermarks("t").await.unwrap(), vec![5]);

        // offsets keep counting from where they were
        assert_eq!(broker.append("t", vec![5]).await.unwrap(), (0, 5));
        let msg = slow.read_message().await.unwrap();
        assert_eq!((msg.offset, msg.value), (4, vec![4]));
        let msg = fast.read_message().await.unwrap();
        assert_eq!((msg.offset, msg.value), (5, vec![5]));

        // a group joining later starts at the oldest retained message
        let mut late = broker.reader("t", "late").await.unwrap();
        assert_eq!(late.read_message().await.unwrap().offset, 4);
    }

    #[tokio::test]
    async fn seek_outside_retained_range() {
        let broker = LogBroker::with_retention(1);
        broker.create_topic("t", 1).await;
        for i in 0..4u8 {
            broker.append("t", vec![i]).await.unwrap();
        }
        let mut reader = broker.reader("t", "g").await.unwrap();
        for _ in 0..4 {
            reader.read_message().await.unwrap();
        }
        assert_eq!(broker.low_watermarks("t").await.unwrap(), vec![3]);
        assert!(matches!(
            reader.seek(0, 2).await,
            Err(BrokerError::OffsetOutOfRange { offset: 2, .. })
        ));
        assert!(matches!(
            reader.seek(0, 5).await,
            Err(BrokerError::OffsetOutOfRange { offset: 5, .. })
        ));
        reader.seek(0, 3).await.unwrap();
        let msg = reader.read_message().await.unwrap();
        assert_eq!((msg.offset, msg.value), (3, vec![3]));
    }
}
