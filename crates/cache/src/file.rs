use crate::backend::CacheBackend;
use crate::error::{CacheError, Result};
use async_trait::async_trait;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const ENTRY_MAGIC: &[u8; 4] = b"SC01";
const HEADER_LEN: usize = 12;

/// Directory-backed store. Each key is one file holding an expiry header and
/// the payload, so several instances sharing a volume share the cache.
#[derive(Clone, Debug)]
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.bin", safe_component(key)))
    }
}

#[async_trait]
impl CacheBackend for FileBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.entry_path(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let Some((expires_ms, payload)) = decode_entry(&bytes) else {
            log::warn!("Cache entry corrupted {}; dropping it", path.display());
            let _ = tokio::fs::remove_file(&path).await;
            return Ok(None);
        };
        if expires_ms != 0 && expires_ms <= unix_ms_now() {
            let _ = tokio::fs::remove_file(&path).await;
            return Ok(None);
        }
        Ok(Some(payload.to_vec()))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.entry_path(key);
        let expires_ms = if ttl.is_zero() {
            0
        } else {
            let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
            unix_ms_now().saturating_add(ttl_ms)
        };

        let bytes = encode_entry(expires_ms, &value);
        let dir = self.dir.clone();
        // Each writer stages its own temp file; concurrent refreshes of one
        // key must never share a partially written file.
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut staged = tempfile::Builder::new()
                .prefix(".entry-")
                .suffix(".tmp")
                .tempfile_in(&dir)?;
            staged.write_all(&bytes)?;
            staged.persist(&path).map_err(|err| err.error)?;
            Ok(())
        })
        .await
        .map_err(|err| CacheError::Backend(format!("cache write task failed: {err}")))??;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match tokio::fs::remove_file(self.entry_path(key)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

fn safe_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
            out.push(ch);
        } else {
            out.push('_');
        }
    }
    if out.is_empty() {
        "_".to_string()
    } else {
        out
    }
}

fn encode_entry(expires_ms: u64, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(ENTRY_MAGIC);
    out.extend_from_slice(&expires_ms.to_le_bytes());
    out.extend_from_slice(payload);
    out
}

fn decode_entry(bytes: &[u8]) -> Option<(u64, &[u8])> {
    if bytes.len() < HEADER_LEN || &bytes[0..4] != ENTRY_MAGIC {
        return None;
    }
    let expires_ms = u64::from_le_bytes(bytes[4..HEADER_LEN].try_into().ok()?);
    Some((expires_ms, &bytes[HEADER_LEN..]))
}

fn unix_ms_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn stores_and_reads_back_payloads() {
        let temp = TempDir::new().expect("tempdir");
        let backend = FileBackend::new(temp.path().join("cache"));
        backend
            .set("abc:def", b"payload".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(backend.get("abc:def").await.unwrap(), Some(b"payload".to_vec()));
        assert!(temp.path().join("cache").join("abc_def.bin").exists());

        backend.delete("abc:def").await.unwrap();
        assert_eq!(backend.get("abc:def").await.unwrap(), None);
    }

    #[tokio::test]
    async fn expired_entries_read_as_missing() {
        let temp = TempDir::new().expect("tempdir");
        let backend = FileBackend::new(temp.path());
        backend
            .set("short", b"x".to_vec(), Duration::from_millis(1))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(backend.get("short").await.unwrap(), None);
        assert!(!temp.path().join("short.bin").exists());
    }

    #[tokio::test]
    async fn corrupted_entries_are_dropped() {
        let temp = TempDir::new().expect("tempdir");
        let backend = FileBackend::new(temp.path());
        tokio::fs::write(temp.path().join("bad.bin"), b"nope").await.unwrap();
        assert_eq!(backend.get("bad").await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writers_never_expose_partial_entries() {
        let temp = TempDir::new().expect("tempdir");
        let backend = std::sync::Arc::new(FileBackend::new(temp.path()));
        let ttl = Duration::from_secs(60);
        backend.set("hot", vec![0u8; 64 * 1024], ttl).await.unwrap();

        let mut writers = tokio::task::JoinSet::new();
        for fill in 1..=8u8 {
            let backend = backend.clone();
            writers.spawn(async move {
                for _ in 0..20 {
                    backend.set("hot", vec![fill; 64 * 1024], ttl).await.unwrap();
                }
            });
        }
        for _ in 0..200 {
            let entry = backend.get("hot").await.unwrap().expect("never a spurious miss");
            assert_eq!(entry.len(), 64 * 1024);
            assert!(entry.iter().all(|b| *b == entry[0]));
        }
        while let Some(joined) = writers.join_next().await {
            joined.expect("writer");
        }

        let leftovers: Vec<_> = std::fs::read_dir(temp.path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn envelope_round_trips() {
        let encoded = encode_entry(42, b"data");
        assert_eq!(decode_entry(&encoded), Some((42, &b"data"[..])));
        assert_eq!(decode_entry(b"XX"), None);
    }
}
