use crate::error::Result;
use async_trait::async_trait;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Raw key/value store underneath [`crate::ChunkedCache`].
///
/// Backends see one byte block per key; chunking happens above them. A zero
/// TTL means the entry never expires.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Short name used in logs
    fn name(&self) -> &'static str;
}

pub const DEFAULT_MEMORY_CAPACITY: usize = 10_000;

struct MemEntry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl MemEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |deadline| deadline > now)
    }
}

/// In-process TTL map, bounded by an LRU capacity. Suitable for a single
/// instance; entries vanish with the process.
pub struct MemoryBackend {
    entries: Mutex<LruCache<String, MemEntry>>,
}

impl MemoryBackend {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<String, MemEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new(DEFAULT_MEMORY_CAPACITY)
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let now = Instant::now();
        let mut entries = self.lock();
        match entries.get(key) {
            None => return Ok(None),
            Some(entry) if entry.is_live(now) => return Ok(Some(entry.value.clone())),
            Some(_) => {}
        }
        entries.pop(key);
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        let expires_at = (!ttl.is_zero()).then(|| Instant::now() + ttl);
        self.lock()
            .put(key.to_string(), MemEntry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.lock().pop(key);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
