//! Idempotency keys, and the check-then-write protocol run for every consumed message

use std::{fmt, future::Future, sync::Arc, time::Duration};

use chrono::Utc;
use relay::Observation;
use tokio::{spawn, task::JoinError, time::timeout};

use super::{Message, MessageIdentity};
use crate::store::{IdempotencyStore, StoreError};

pub const KEY_PREFIX: &str = "clima";

/// spaces in a country name would end up in the key
pub fn sanitize_country(country: &str) -> String {
    country.replace(' ', "_")
}

/// The store key for one message.
///
/// A key is stable when it is derived from an identity the stream reproduces on redelivery.
/// Unstable keys are unique per processing attempt, so they can not detect duplicates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupKey {
    key: String,
    stable: bool,
}

impl DedupKey {
    pub fn derive(country: &str, identity: &MessageIdentity) -> Self {
        let country = sanitize_country(country);
        match identity {
            MessageIdentity::Position { partition, offset } => Self {
                key: format!("{KEY_PREFIX}:{country}:{partition}-{offset}"),
                stable: true,
            },
            MessageIdentity::MessageId(id) => Self {
                key: format!("{KEY_PREFIX}:{country}:{id}"),
                stable: true,
            },
            MessageIdentity::None => {
                let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
                Self {
                    key: format!("{KEY_PREFIX}:{country}:{nanos}"),
                    stable: false,
                }
            }
        }
    }

    pub fn as_str(&self) -> &str {
        &self.key
    }

    pub fn is_stable(&self) -> bool {
        self.stable
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

/// what became of one message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Stored(DedupKey),
    Duplicate(DedupKey),
    /// could not be decoded or stored (already logged)
    Dropped,
}

#[derive(Debug, thiserror::Error)]
enum ProcessError {
    #[error("store call failed: {0}")]
    Store(#[from] StoreError),
    #[error("store call timed out after {0:?}")]
    StoreTimeout(Duration),
    #[error("write task failed: {0}")]
    Task(#[from] JoinError),
}

async fn deadline<T>(
    limit: Duration,
    fut: impl Future<Output = Result<T, StoreError>>,
) -> Result<T, ProcessError> {
    timeout(limit, fut)
        .await
        .map_err(|_| ProcessError::StoreTimeout(limit))?
        .map_err(ProcessError::from)
}

/// Write `record` at `key` and give it its expiration.
///
/// If the expiration can not be set the record is removed again, so a later delivery stores it
/// instead of finding a record that never expires.
async fn write_expiring(
    store: Arc<dyn IdempotencyStore>,
    key: String,
    record: Observation,
    ttl: Duration,
    store_timeout: Duration,
) -> Result<(), ProcessError> {
    deadline(
        store_timeout,
        store.write_fields(
            &key,
            &[
                ("description", record.description.as_str()),
                ("country", record.country.as_str()),
                ("weather", record.weather.as_str()),
            ],
        ),
    )
    .await?;
    let Err(e) = deadline(store_timeout, store.set_expiration(&key, ttl)).await else {
        return Ok(());
    };
    match deadline(store_timeout, store.delete(&key)).await {
        Ok(()) => warn!("removed {key}, its expiration could not be set"),
        Err(del) => error!("{key} is stored without an expiration, removing it failed: {del}"),
    }
    Err(e)
}

pub struct Processor {
    store: Arc<dyn IdempotencyStore>,
    ttl: Duration,
    store_timeout: Duration,
}

impl Processor {
    pub fn new(store: Arc<dyn IdempotencyStore>, ttl: Duration, store_timeout: Duration) -> Self {
        Self {
            store,
            ttl,
            store_timeout,
        }
    }

    /// decode `msg`, and store it unless it was already stored. no retries
    pub async fn process(&self, worker: usize, msg: &Message) -> Disposition {
        let record = match Observation::from_payload(&msg.payload) {
            Ok(record) => record,
            Err(e) => {
                error!("[worker {worker}] dropping undecodable message {:?}: {e}", msg.identity);
                return Disposition::Dropped;
            }
        };
        let key = DedupKey::derive(&record.country, &msg.identity);
        match self.check_and_write(&key, &record).await {
            Ok(true) => {
                info!("[worker {worker}] stored {key}");
                Disposition::Stored(key)
            }
            Ok(false) => {
                info!("[worker {worker}] duplicate message {key}, skipping");
                Disposition::Duplicate(key)
            }
            Err(e) => {
                error!("[worker {worker}] dropping message {key}: {e}");
                Disposition::Dropped
            }
        }
    }

    /// false if the record was already present
    async fn check_and_write(&self, key: &DedupKey, record: &Observation) -> Result<bool, ProcessError> {
        if key.is_stable() {
            if deadline(self.store_timeout, self.store.exists(key.as_str())).await? {
                return Ok(false);
            }
        } else {
            debug!("{key} has no stable identity, not checking for duplicates");
        }
        // runs to completion even if this message is given up on
        spawn(write_expiring(
            self.store.clone(),
            key.to_string(),
            record.clone(),
            self.ttl,
            self.store_timeout,
        ))
        .await??;
        Ok(true)
    }
}
