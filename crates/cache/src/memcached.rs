use crate::backend::CacheBackend;
use crate::error::{CacheError, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Address of the shared memcached server, e.g. `10.0.0.5:11211`.
pub const MEMCACHED_ENV: &str = "SCHEMALESS_MEMCACHED";

const MAX_KEY_LEN: usize = 250;

/// Memcached reads expirations above 30 days as absolute unix timestamps.
const MAX_RELATIVE_EXPIRY_SECS: u64 = 60 * 60 * 24 * 30;

/// Memcached-backed store shared by every instance pointing at the same
/// server. The client is blocking, so each call runs on the blocking pool.
pub struct MemcachedBackend {
    client: Arc<memcache::Client>,
    url: String,
}

impl MemcachedBackend {
    pub fn connect(addr: &str) -> Result<Self> {
        let url = server_url(addr);
        let client = memcache::Client::connect(url.as_str())
            .map_err(|err| CacheError::Backend(format!("cannot connect to {url}: {err}")))?;
        log::info!("Connected to memcached at {url}");
        Ok(Self {
            client: Arc::new(client),
            url,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn run<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&memcache::Client) -> std::result::Result<T, memcache::MemcacheError>
            + Send
            + 'static,
    {
        let client = self.client.clone();
        tokio::task::spawn_blocking(move || op(&client))
            .await
            .map_err(|err| CacheError::Backend(format!("memcached task failed: {err}")))?
            .map_err(|err| CacheError::Backend(format!("memcached: {err}")))
    }
}

#[async_trait]
impl CacheBackend for MemcachedBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let key = wire_key(key);
        self.run(move |client| client.get::<Vec<u8>>(&key)).await
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        let key = wire_key(key);
        let expiration = expiration_for(ttl, unix_secs_now());
        self.run(move |client| client.set(&key, value.as_slice(), expiration))
            .await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let key = wire_key(key);
        self.run(move |client| client.delete(&key)).await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memcached"
    }
}

/// `host:port` becomes `memcache://host:port`; full URLs pass through.
pub fn server_url(addr: &str) -> String {
    let addr = addr.trim();
    if addr.contains("://") {
        addr.to_string()
    } else {
        format!("memcache://{addr}")
    }
}

/// Keys memcached accepts are kept; longer ones, or ones with spaces or
/// control characters, are replaced by their SHA-256.
pub fn wire_key(key: &str) -> String {
    let valid = !key.is_empty()
        && key.len() <= MAX_KEY_LEN
        && key.bytes().all(|b| b.is_ascii_graphic());
    if valid {
        return key.to_string();
    }
    let digest = Sha256::digest(key.as_bytes());
    let mut out = String::with_capacity(7 + digest.len() * 2);
    out.push_str("sha256-");
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Memcached expiration field for `ttl`: 0 never expires, up to 30 days is
/// relative seconds, anything longer is an absolute unix time.
pub fn expiration_for(ttl: Duration, now_unix_secs: u64) -> u32 {
    if ttl.is_zero() {
        return 0;
    }
    let secs = ttl.as_secs().max(1);
    let value = if secs <= MAX_RELATIVE_EXPIRY_SECS {
        secs
    } else {
        now_unix_secs.saturating_add(secs)
    };
    u32::try_from(value).unwrap_or(u32::MAX)
}

fn unix_secs_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}
