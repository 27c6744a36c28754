use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use flume::Receiver;
use tokio::{select, spawn, task::JoinHandle, time::timeout};

use super::{dedup::Disposition, Message, Processor, ReadError, StreamReader};
use crate::{core::shutdown::ShutdownHandle, transport::Transport};

#[derive(Debug, Default)]
pub struct PoolStats {
    stored: AtomicU64,
    duplicates: AtomicU64,
    dropped: AtomicU64,
}

impl PoolStats {
    pub fn stored(&self) -> u64 {
        self.stored.load(Ordering::Relaxed)
    }

    pub fn duplicates(&self) -> u64 {
        self.duplicates.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn count(&self, disposition: &Disposition) {
        let counter = match disposition {
            Disposition::Stored(_) => &self.stored,
            Disposition::Duplicate(_) => &self.duplicates,
            Disposition::Dropped => &self.dropped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// One dispatch loop feeding a fixed number of workers through a bounded buffer.
///
/// When the buffer is full the dispatch loop stops reading, so the stream position only
/// advances as fast as the workers keep up.
pub struct WorkerPool {
    transport: Transport,
    workers: usize,
    capacity: usize,
    message_timeout: Duration,
    processor: Arc<Processor>,
    stats: Arc<PoolStats>,
}

impl WorkerPool {
    pub fn new(
        transport: Transport,
        workers: usize,
        capacity: usize,
        message_timeout: Duration,
        processor: Processor,
    ) -> Self {
        Self {
            transport,
            workers: workers.max(1),
            capacity: capacity.max(1),
            message_timeout,
            processor: Arc::new(processor),
            stats: Arc::default(),
        }
    }

    pub fn stats(&self) -> Arc<PoolStats> {
        self.stats.clone()
    }

    /// Run until the stream closes or shutdown is triggered, then let the workers finish every
    /// message already read.
    pub async fn run(self, mut reader: impl StreamReader, mut handle: ShutdownHandle) -> Arc<PoolStats> {
        let transport = self.transport;
        let (tx, rx) = flume::bounded::<Message>(self.capacity);
        let workers = (0..self.workers)
            .map(|id| {
                spawn(worker(
                    transport,
                    id,
                    rx.clone(),
                    self.processor.clone(),
                    self.stats.clone(),
                    self.message_timeout,
                ))
            })
            .collect::<Vec<JoinHandle<()>>>();
        drop(rx);
        info!(
            "[{transport}] consuming {} with {} workers",
            reader.describe(),
            self.workers
        );

        loop {
            let res = select! {
                _ = handle.wait_for_shutdown() => break,
                res = reader.next() => res,
            };
            match res {
                Ok(msg) => {
                    trace!("[{transport}] dispatching {:?}", msg.identity);
                    if tx.send_async(msg).await.is_err() {
                        error!("[{transport}] every worker has exited, stopping");
                        break;
                    }
                }
                Err(ReadError::Closed) => {
                    info!("[{transport}] stream closed");
                    break;
                }
                Err(e) => {
                    error!("[{transport}] {e}, stopping");
                    break;
                }
            }
        }

        drop(tx);
        debug!("[{transport}] waiting for workers to drain the buffer");
        for w in workers {
            if let Err(e) = w.await {
                error!("[{transport}] worker task failed: {e:?}");
            }
        }
        info!(
            "[{transport}] consumer stopped: {} stored, {} duplicates, {} dropped",
            self.stats.stored(),
            self.stats.duplicates(),
            self.stats.dropped()
        );
        self.stats
    }
}

async fn worker(
    transport: Transport,
    id: usize,
    rx: Receiver<Message>,
    processor: Arc<Processor>,
    stats: Arc<PoolStats>,
    message_timeout: Duration,
) {
    while let Ok(msg) = rx.recv_async().await {
        let disposition = match timeout(message_timeout, processor.process(id, &msg)).await {
            Ok(disposition) => disposition,
            Err(_) => {
                warn!(
                    "[{transport}] [worker {id}] gave up on {:?} after {message_timeout:?}",
                    msg.identity
                );
                Disposition::Dropped
            }
        };
        stats.count(&disposition);
    }
    trace!("[{transport}] worker {id} exiting");
}
