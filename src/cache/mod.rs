//! Response cache subsystem.
//!
//! # Data Flow
//! ```text
//! Handler with CachePolicy:
//!     → gateway.rs builds the key (handler key builder or default)
//!     → store.rs get(key)
//!         hit  → decode envelope → replay messages (request marked cached)
//!         miss → live invocation → encode messages → store.rs set(key, ttl)
//! ```
//!
//! # Design Decisions
//! - The store is opaque and shared; expiry is the store's job, and the
//!   server runs `run_sweeper` so unread expired entries do not pile up
//! - Cached entries are the exact wire messages, so replay is byte-identical
//! - A corrupt entry is an error, never silently treated as a miss

pub mod gateway;
pub mod store;

use std::sync::Arc;
use std::time::Duration;

use crate::http::Request;

pub use gateway::{decode_messages, default_cache_key, encode_messages, ResponseCache};
pub use store::{run_sweeper, MemoryStore, Store, StoreError};

/// Derives a cache key from a request.
pub type KeyBuilder = Arc<dyn Fn(&Request) -> String + Send + Sync>;

/// How long a cached response lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheTtl {
    /// The application's configured default expiration.
    #[default]
    Default,
    /// Never expires.
    Never,
    After(Duration),
}

/// Per-handler caching policy. A handler caches iff it has one.
#[derive(Clone, Default)]
pub struct CachePolicy {
    pub ttl: CacheTtl,
    pub key_builder: Option<KeyBuilder>,
}

impl CachePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = CacheTtl::After(ttl);
        self
    }

    pub fn never_expire(mut self) -> Self {
        self.ttl = CacheTtl::Never;
        self
    }

    pub fn key_builder<F>(mut self, f: F) -> Self
    where
        F: Fn(&Request) -> String + Send + Sync + 'static,
    {
        self.key_builder = Some(Arc::new(f));
        self
    }
}

impl std::fmt::Debug for CachePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachePolicy")
            .field("ttl", &self.ttl)
            .field("custom_key", &self.key_builder.is_some())
            .finish()
    }
}
