use tokio::sync::{broadcast, mpsc};

use crate::misc::Take;

pub mod util;

/// Held by every long running task.
///
/// `Shutdown::wait_for_completion` returns once every handle has been dropped
#[derive(Debug)]
pub struct ShutdownHandle {
    #[allow(unused)]
    inner: mpsc::Sender<()>,
    listener: broadcast::Receiver<()>,
    trigger: broadcast::Sender<()>,
}

impl ShutdownHandle {
    pub async fn wait_for_shutdown(&mut self) {
        let _ = self.listener.recv().await;
    }

    pub fn trigger_shutdown(&mut self) {
        let _ = self.trigger.send(());
    }

    /// a new handle, tracked by the same `Shutdown`
    #[cfg(test)]
    pub fn clone_handle(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            listener: self.trigger.subscribe(),
            trigger: self.trigger.clone(),
        }
    }
}

pub struct Shutdown {
    tx: Take<mpsc::Sender<()>>,
    rx: mpsc::Receiver<()>,
    trigger: broadcast::Sender<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(1);
        let (trigger, _) = broadcast::channel(1);
        Self {
            tx: Take::new(tx),
            rx,
            trigger,
        }
    }

    /// # Panics
    /// if called after `wait_for_completion`
    pub fn handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            inner: self.tx.clone(),
            listener: self.trigger.subscribe(),
            trigger: self.trigger.clone(),
        }
    }

    pub async fn wait_for_completion(&mut self) {
        if !self.tx.is_taken() {
            drop(self.tx.take());
        }
        self.rx.recv().await;
    }

    pub fn trigger_shutdown(&self) {
        let _ = self.trigger.send(());
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::Shutdown;

    #[tokio::test]
    async fn completes_once_handles_drop() {
        let mut shutdown = Shutdown::new();
        let mut handle = shutdown.handle();
        let task = tokio::spawn(async move {
            handle.wait_for_shutdown().await;
            tokio::time::sleep(Duration::from_millis(10)).await;
            drop(handle);
        });
        shutdown.trigger_shutdown();
        shutdown.wait_for_completion().await;
        assert!(task.is_finished() || task.await.is_ok());
        // calling again after completion is fine
        shutdown.wait_for_completion().await;
    }

    #[tokio::test]
    async fn handle_can_trigger() {
        let mut shutdown = Shutdown::new();
        let mut a = shutdown.handle();
        let mut b = a.clone_handle();
        a.trigger_shutdown();
        b.wait_for_shutdown().await;
        drop((a, b));
        shutdown.wait_for_completion().await;
    }
}
