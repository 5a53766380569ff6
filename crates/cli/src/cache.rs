use anyhow::{Context, Result};
use clap::ValueEnum;
use schemaless_cache::{
    CacheBackend, ChunkedCache, FileBackend, MemcachedBackend, MemoryBackend,
    DEFAULT_MEMORY_CAPACITY, MEMCACHED_ENV,
};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct CacheConfig {
    pub dir: PathBuf,
    pub backend: CacheBackendKind,
    pub capacity: usize,
    /// Server of the memcached backend
    pub memcached_addr: Option<String>,
}

#[derive(Clone, Debug, Copy, PartialEq, Eq, ValueEnum)]
pub enum CacheBackendKind {
    /// In-process, lost on exit
    Memory,
    /// Envelope files under --cache-dir, shareable between instances
    File,
    /// Shared memcached server (--memcached-addr), for multi-instance deployments
    Memcached,
}

impl CacheConfig {
    pub fn with_defaults() -> Self {
        Self {
            dir: PathBuf::from(".schemaless/cache"),
            backend: CacheBackendKind::Memory,
            capacity: DEFAULT_MEMORY_CAPACITY,
            memcached_addr: None,
        }
    }

    pub fn ensure_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Cannot create cache dir {}", self.dir.display()))
    }

    pub fn build(&self) -> Result<Arc<ChunkedCache>> {
        let backend: Arc<dyn CacheBackend> = match self.backend {
            CacheBackendKind::Memory => Arc::new(MemoryBackend::new(self.capacity)),
            CacheBackendKind::File => {
                self.ensure_dir()?;
                Arc::new(FileBackend::new(&self.dir))
            }
            CacheBackendKind::Memcached => {
                let addr = self
                    .memcached_addr
                    .as_deref()
                    .map(str::trim)
                    .filter(|addr| !addr.is_empty())
                    .with_context(|| {
                        format!(
                            "--cache-backend memcached requires --memcached-addr or {MEMCACHED_ENV}"
                        )
                    })?;
                Arc::new(MemcachedBackend::connect(addr)?)
            }
        };
        log::debug!("Using {} cache backend", backend.name());
        Ok(Arc::new(ChunkedCache::new(backend)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn memory_backend_needs_no_directory() {
        let temp = TempDir::new().unwrap();
        let cfg = CacheConfig {
            dir: temp.path().join("never-created"),
            ..CacheConfig::with_defaults()
        };
        let cache = cfg.build().unwrap();
        assert_eq!(cache.backend_name(), "memory");
        assert!(!cfg.dir.exists());
    }

    #[test]
    fn file_backend_creates_its_directory() {
        let temp = TempDir::new().unwrap();
        let cfg = CacheConfig {
            dir: temp.path().join("cache"),
            backend: CacheBackendKind::File,
            capacity: 1,
            memcached_addr: None,
        };
        let cache = cfg.build().unwrap();
        assert_eq!(cache.backend_name(), "file");
        assert!(cfg.dir.is_dir());
    }

    #[test]
    fn memcached_backend_requires_an_address() {
        let cfg = CacheConfig {
            backend: CacheBackendKind::Memcached,
            memcached_addr: Some("  ".to_string()),
            ..CacheConfig::with_defaults()
        };
        let err = cfg.build().err().expect("missing address");
        assert!(err.to_string().contains("--memcached-addr"));
    }
}
