use std::{
    collections::{BTreeMap, HashMap},
    path::{Path, PathBuf},
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::{
    fs::{File, OpenOptions},
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
    sync::Mutex,
};

use super::{IdempotencyStore, StoreError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub fields: BTreeMap<String, String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// the on-disk form of the store, sorted by key
pub type Snapshot = BTreeMap<String, Entry>;

/// An in-process store.
///
/// Expired records are invisible as soon as they expire, and are removed by `sweep`.
/// When opened from a file, `sync` writes every record back to it.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    snapshot: Option<Mutex<File>>,
}

impl MemoryStore {
    #[cfg(test)]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the snapshot at `path`, starting empty if it does not exist.
    /// records that expired while the store was not running are discarded
    #[instrument]
    pub async fn open(path: PathBuf) -> Result<Self, StoreError> {
        let new = !path.exists();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .await?;
        let mut snapshot = Snapshot::new();
        if !new {
            let mut buf = String::new();
            file.read_to_string(&mut buf).await?;
            if !buf.trim().is_empty() {
                snapshot = serde_json::from_str(&buf)?;
            }
        }
        let now = Utc::now();
        let total = snapshot.len();
        let entries = snapshot
            .into_iter()
            .filter(|(_, e)| e.is_live(now))
            .collect::<HashMap<_, _>>();
        info!(
            "loaded {} records from {path:?} ({} expired)",
            entries.len(),
            total - entries.len()
        );
        Ok(Self {
            entries: Mutex::new(entries),
            snapshot: Some(Mutex::new(file)),
        })
    }

    /// write all live records to the snapshot file (no-op for a store without one)
    #[instrument(skip(self))]
    pub async fn sync(&self) -> Result<(), StoreError> {
        let Some(file) = &self.snapshot else {
            return Ok(());
        };
        let serialized = {
            let now = Utc::now();
            let entries = self.entries.lock().await;
            let snapshot = entries
                .iter()
                .filter(|(_, e)| e.is_live(now))
                .map(|(k, e)| (k.clone(), e.clone()))
                .collect::<Snapshot>();
            serde_json::to_string_pretty(&snapshot)?
        };
        let mut file = file.lock().await;
        file.set_len(0).await?;
        file.seek(std::io::SeekFrom::Start(0)).await?;
        file.write_all(serialized.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// drop every expired record, returning how many were removed
    pub async fn sweep(&self) -> usize {
        let now = Utc::now();
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, e| e.is_live(now));
        before - entries.len()
    }

    #[cfg(test)]
    pub async fn get(&self, key: &str) -> Option<Entry> {
        let entries = self.entries.lock().await;
        entries.get(key).filter(|e| e.is_live(Utc::now())).cloned()
    }

    /// live keys starting with `prefix`
    #[cfg(test)]
    pub async fn keys(&self, prefix: &str) -> Vec<String> {
        let now = Utc::now();
        let entries = self.entries.lock().await;
        let mut keys = entries
            .iter()
            .filter(|(k, e)| k.starts_with(prefix) && e.is_live(now))
            .map(|(k, _)| k.clone())
            .collect::<Vec<_>>();
        keys.sort();
        keys
    }

    /// number of live records
    pub async fn len(&self) -> usize {
        let now = Utc::now();
        let entries = self.entries.lock().await;
        entries.values().filter(|e| e.is_live(now)).count()
    }
}

#[async_trait]
impl IdempotencyStore for MemoryStore {
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let entries = self.entries.lock().await;
        Ok(entries.get(key).is_some_and(|e| e.is_live(Utc::now())))
    }

    async fn write_fields(&self, key: &str, fields: &[(&str, &str)]) -> Result<(), StoreError> {
        let now = Utc::now();
        let mut entries = self.entries.lock().await;
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            fields: BTreeMap::new(),
            expires_at: None,
        });
        if !entry.is_live(now) {
            entry.fields.clear();
            entry.expires_at = None;
        }
        for (field, value) in fields {
            entry.fields.insert(field.to_string(), value.to_string());
        }
        Ok(())
    }

    async fn set_expiration(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let ttl_chrono = chrono::Duration::from_std(ttl).map_err(|_| StoreError::InvalidTtl(ttl))?;
        let now = Utc::now();
        let expires_at = now
            .checked_add_signed(ttl_chrono)
            .ok_or(StoreError::InvalidTtl(ttl))?;
        let mut entries = self.entries.lock().await;
        match entries.get_mut(key).filter(|e| e.is_live(now)) {
            Some(entry) => {
                entry.expires_at = Some(expires_at);
                Ok(())
            }
            None => Err(StoreError::NoSuchKey(key.to_string())),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.lock().await.remove(key);
        Ok(())
    }
}

/// read a snapshot written by `MemoryStore::sync`, without opening it for writing
pub async fn read_snapshot(path: &Path) -> Result<Snapshot, StoreError> {
    let buf = tokio::fs::read_to_string(path).await?;
    if buf.trim().is_empty() {
        return Ok(Snapshot::new());
    }
    Ok(serde_json::from_str(&buf)?)
}
