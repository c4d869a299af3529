use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, Instant};

use super::CacheStore;
use crate::error::CacheError;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

struct Entry {
    payload: String,
    expires_at: Instant,
}

/// Process-local store. Entries past their ttl are invisible to `load` and
/// are dropped by a periodic sweep once [`CacheStore::init`] has run.
#[derive(Default)]
pub struct MemoryStore {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn sweep_expired(entries: &Arc<RwLock<HashMap<String, Entry>>>) {
        let now = Instant::now();
        let mut entries = entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        let dropped = before - entries.len();
        if dropped > 0 {
            tracing::debug!("Swept {} expired index cache entries", dropped);
        }
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn load(&self, key: &str) -> Result<Option<String>, CacheError> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.payload.clone()))
    }

    async fn store(&self, key: &str, payload: String, ttl: Duration) -> Result<(), CacheError> {
        let mut entries = self.entries.write().await;
        entries.insert(
            key.to_string(),
            Entry {
                payload,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn init(&self) -> Result<(), CacheError> {
        let mut sweeper = self
            .sweeper
            .lock()
            .map_err(|e| CacheError::Store(e.to_string()))?;
        if sweeper.is_some() {
            return Ok(());
        }

        let entries = self.entries.clone();
        *sweeper = Some(tokio::spawn(async move {
            let mut sweep_interval = interval(SWEEP_INTERVAL);
            loop {
                sweep_interval.tick().await;
                Self::sweep_expired(&entries).await;
            }
        }));
        Ok(())
    }

    async fn shutdown(&self) {
        let handle = match self.sweeper.lock() {
            Ok(mut sweeper) => sweeper.take(),
            Err(_) => None,
        };
        if let Some(handle) = handle {
            handle.abort();
        }
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
