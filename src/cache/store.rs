//! Key-value stores backing the response cache.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use thiserror::Error;
use tokio::time::{self, Instant};

use crate::lifecycle::Shutdown;

/// Store-layer failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store operation failed: {0}")]
    Backend(String),
}

/// Opaque key-value store. Implementations must be safe for concurrent use.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError>;

    /// Store `value`; `ttl = None` means it never expires.
    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<(), StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Drop expired entries, returning how many went. Backends that expire
    /// keys on their own keep the default.
    async fn purge_expired(&self) -> Result<usize, StoreError> {
        Ok(0)
    }
}

/// Purge `store` every `every` until `shutdown` fires.
pub async fn run_sweeper(store: Arc<dyn Store>, every: Duration, shutdown: Shutdown) {
    tracing::debug!(interval_ms = every.as_millis() as u64, "Cache sweeper starting");
    let mut ticker = time::interval(every);
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => match store.purge_expired().await {
                Ok(0) => {}
                Ok(removed) => tracing::debug!(removed, "Purged expired cache entries"),
                Err(e) => tracing::warn!(error = %e, "Cache sweep failed"),
            },
            _ = shutdown.wait() => {
                tracing::debug!("Cache sweeper received shutdown signal, exiting loop");
                break;
            }
        }
    }
}

#[derive(Debug, Clone)]
struct StoredValue {
    data: Bytes,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// A thread-safe in-memory store with per-key expiry.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<DashMap<String, StoredValue>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries, including ones that expired but were not read since.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn delete_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.inner.len();
        self.inner.retain(|_, v| !v.is_expired(now));
        before - self.inner.len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        let now = Instant::now();
        let value = self.inner.get(key).map(|r| r.value().clone());
        match value {
            Some(v) if v.is_expired(now) => {
                self.inner.remove_if(key, |_, v| v.is_expired(now));
                Ok(None)
            }
            Some(v) => Ok(Some(v.data)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<(), StoreError> {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.inner.insert(
            key.to_string(),
            StoredValue {
                data: value,
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.inner.remove(key);
        Ok(())
    }

    async fn purge_expired(&self) -> Result<usize, StoreError> {
        Ok(self.delete_expired())
    }
}
