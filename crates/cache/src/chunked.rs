use crate::backend::CacheBackend;
use crate::error::{CacheError, Result};
use std::sync::Arc;
use std::time::Duration;

/// Largest block written under a single backend key.
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 1_020_000;

/// Payloads above `max_chunk_size * max_chunks` are refused.
pub const DEFAULT_MAX_CHUNKS: usize = 50;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkedCacheConfig {
    pub max_chunk_size: usize,
    pub max_chunks: usize,
}

impl Default for ChunkedCacheConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            max_chunks: DEFAULT_MAX_CHUNKS,
        }
    }
}

impl ChunkedCacheConfig {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.max_chunk_size == 0 {
            return Err("max_chunk_size must be > 0".to_string());
        }
        if self.max_chunks == 0 {
            return Err("max_chunks must be > 0".to_string());
        }
        Ok(())
    }

    /// Largest payload `set` accepts.
    pub fn size_limit(&self) -> usize {
        self.max_chunk_size.saturating_mul(self.max_chunks)
    }
}

/// TTL cache that splits large values across `key`, `key_1`, `key_2`, ...
///
/// A stored block exactly `max_chunk_size` long signals that another chunk
/// follows; reads keep concatenating until a shorter block or a missing key.
/// Writes whose last chunk is exactly full append an empty terminator chunk.
pub struct ChunkedCache {
    backend: Arc<dyn CacheBackend>,
    config: ChunkedCacheConfig,
}

impl ChunkedCache {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self::with_config(backend, ChunkedCacheConfig::default())
    }

    pub fn with_config(backend: Arc<dyn CacheBackend>, config: ChunkedCacheConfig) -> Self {
        let config = ChunkedCacheConfig {
            max_chunk_size: config.max_chunk_size.max(1),
            max_chunks: config.max_chunks.max(1),
        };
        Self { backend, config }
    }

    pub fn config(&self) -> &ChunkedCacheConfig {
        &self.config
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let key = normalize_key(key);
        if key.is_empty() {
            return Ok(None);
        }

        let max = self.config.max_chunk_size;
        let Some(mut data) = self.backend.get(&key).await? else {
            return Ok(None);
        };
        if data.len() != max {
            return Ok(Some(data));
        }

        for index in 1..=self.config.max_chunks {
            let Some(chunk) = self.backend.get(&chunk_key(&key, index)).await? else {
                break;
            };
            let len = chunk.len();
            data.extend_from_slice(&chunk);
            if len != max {
                break;
            }
        }
        Ok(Some(data))
    }

    /// Read an entry and, on a hit, store it again so its TTL restarts.
    pub async fn get_refreshing(&self, key: &str, ttl: Duration) -> Result<Option<Vec<u8>>> {
        let found = self.get(key).await?;
        if let Some(data) = &found {
            if let Err(err) = self.set(key, data, ttl).await {
                log::warn!("Failed to refresh cache TTL for '{key}': {err}");
            }
        }
        Ok(found)
    }

    pub async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let key = normalize_key(key);
        if key.is_empty() {
            log::warn!(
                "Empty cache key for value of {} bytes; skipping cache",
                value.len()
            );
            return Ok(());
        }

        let limit = self.config.size_limit();
        if value.len() > limit {
            return Err(CacheError::TooLarge {
                key,
                size: value.len(),
                limit,
            });
        }

        let max = self.config.max_chunk_size;
        if value.len() < max {
            return self.backend.set(&key, value.to_vec(), ttl).await;
        }

        let mut written = 0;
        for (index, chunk) in value.chunks(max).enumerate() {
            self.backend
                .set(&chunk_key(&key, index), chunk.to_vec(), ttl)
                .await?;
            written = index + 1;
        }
        if value.len() % max == 0 {
            self.backend
                .set(&chunk_key(&key, written), Vec::new(), ttl)
                .await?;
        }
        log::debug!(
            "Cached '{key}' as {written} chunk(s) ({} bytes) in {} backend",
            value.len(),
            self.backend.name()
        );
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        let key = normalize_key(key);
        if key.is_empty() {
            return Ok(());
        }
        self.backend.delete(&key).await?;
        for index in 1..=self.config.max_chunks {
            let next = chunk_key(&key, index);
            if self.backend.get(&next).await?.is_none() {
                break;
            }
            self.backend.delete(&next).await?;
        }
        Ok(())
    }
}

/// Backend keys never contain spaces.
pub fn normalize_key(key: &str) -> String {
    key.replace(' ', "_")
}

pub fn chunk_key(key: &str, index: usize) -> String {
    if index == 0 {
        key.to_string()
    } else {
        format!("{key}_{index}")
    }
}

pub fn ttl_minutes(minutes: u64) -> Duration {
    Duration::from_secs(minutes.saturating_mul(60))
}
