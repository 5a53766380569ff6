//! # Schemaless Cache
//!
//! TTL key/value storage for learned mappings and model responses.
//!
//! [`ChunkedCache`] sits on top of a [`CacheBackend`] and splits payloads
//! larger than one block across numbered keys, so backends with a per-value
//! size ceiling can still hold large skeletons.
//!
//! Backends: [`MemoryBackend`] for a single process, [`FileBackend`] for a
//! shared directory, and [`MemcachedBackend`] for multi-instance deployments.
//!
//! ```rust
//! use schemaless_cache::{ChunkedCache, MemoryBackend};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let cache = ChunkedCache::new(Arc::new(MemoryBackend::default()));
//! cache.set("shape key", b"{}", Duration::from_secs(60)).await.unwrap();
//! assert_eq!(cache.get("shape key").await.unwrap(), Some(b"{}".to_vec()));
//! # }
//! ```

mod backend;
mod chunked;
mod error;
mod file;
mod memcached;

pub use backend::{CacheBackend, MemoryBackend, DEFAULT_MEMORY_CAPACITY};
pub use chunked::{
    chunk_key, normalize_key, ttl_minutes, ChunkedCache, ChunkedCacheConfig,
    DEFAULT_MAX_CHUNKS, DEFAULT_MAX_CHUNK_SIZE,
};
pub use error::{CacheError, Result};
pub use file::FileBackend;
pub use memcached::{expiration_for, server_url, wire_key, MemcachedBackend, MEMCACHED_ENV};
