use std::{sync::Arc, time::Duration};

use tokio::{
    select,
    time::{interval_at, Instant, MissedTickBehavior},
};

use super::shutdown::ShutdownHandle;
use crate::store::MemoryStore;

/// Periodically sweep expired records out of `store` and write it to disk, until shutdown.
///
/// The final save is left to the owner of the store, once nothing else writes to it.
#[instrument(skip(store, handle))]
pub async fn autosave(store: Arc<MemoryStore>, every: Duration, mut handle: ShutdownHandle) {
    let mut interval = interval_at(Instant::now() + every, every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        select! {
            _ = handle.wait_for_shutdown() => break,
            _ = interval.tick() => {
                let swept = store.sweep().await;
                debug!("saving... ({swept} expired records removed)");
                match store.sync().await {
                    Ok(()) => {
                        let records = store.len().await;
                        trace!("saved {records} records");
                    }
                    Err(e) => error!("failed to save the store: {e:?}"),
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::{sync::Arc, time::Duration};

    use super::autosave;
    use crate::{
        core::shutdown::Shutdown,
        store::{memory::read_snapshot, IdempotencyStore, MemoryStore},
    };

    #[tokio::test]
    async fn saves_until_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let store = Arc::new(MemoryStore::open(path.clone()).await.unwrap());
        let mut shutdown = Shutdown::new();
        let task = tokio::spawn(autosave(
            store.clone(),
            Duration::from_millis(10),
            shutdown.handle(),
        ));
        store
            .write_fields("clima:Peru:0-0", &[("country", "Peru")])
            .await
            .unwrap();
        let mut saved = false;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if read_snapshot(&path).await.unwrap().contains_key("clima:Peru:0-0") {
                saved = true;
                break;
            }
        }
        assert!(saved, "store was never saved");
        shutdown.trigger_shutdown();
        task.await.unwrap();
        shutdown.wait_for_completion().await;
    }
}
