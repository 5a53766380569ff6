//! Persistent storage of standards, examples and learned mappings.

use crate::error::{EngineError, Result};
use crate::keys::safe_name;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Where standards come from and where learned artifacts go.
///
/// Reads return `Ok(None)` for absent entries; `Err` is reserved for storage
/// that could not be consulted at all.
#[async_trait]
pub trait SchemaStore: Send + Sync {
    /// Example body of the named standard
    async fn get_standard(&self, name: &str) -> Result<Option<String>>;

    /// Input/output example pair recorded for a mapping name
    async fn get_example(&self, name: &str) -> Result<Option<String>>;

    async fn save_example(&self, name: &str, body: &str) -> Result<()>;

    /// Value-free skeleton of an input, kept for inspection
    async fn save_raw_input(&self, name: &str, skeleton: &str) -> Result<()>;

    /// Prompt sent to the model
    async fn save_query(&self, name: &str, query: &str) -> Result<()>;

    async fn load_mapping(&self, name: &str) -> Result<Option<String>>;

    async fn save_mapping(&self, name: &str, mapping: &str) -> Result<()>;
}

const STANDARDS_DIR: &str = "standards";
const EXAMPLES_DIR: &str = "examples";
const INPUT_DIR: &str = "input";
const QUERIES_DIR: &str = "queries";
const MAPPINGS_DIR: &str = "translation_output";

/// Directory tree store:
///
/// ```text
/// <root>/standards/<name>.json
/// <root>/examples/<name>.json
/// <root>/input/<name>
/// <root>/queries/<name>
/// <root>/translation_output/<name>.json
/// ```
#[derive(Debug, Clone)]
pub struct FsSchemaStore {
    root: PathBuf,
}

impl FsSchemaStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `$FILE_LOCATION/schemaless`, or the working directory when unset.
    pub fn from_env() -> Self {
        let root = std::env::var("FILE_LOCATION")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map_or_else(|| PathBuf::from("."), |v| PathBuf::from(v).join("schemaless"));
        Self::new(root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn ensure_dirs(&self) -> Result<()> {
        for dir in [STANDARDS_DIR, EXAMPLES_DIR, INPUT_DIR, QUERIES_DIR, MAPPINGS_DIR] {
            tokio::fs::create_dir_all(self.root.join(dir)).await?;
        }
        Ok(())
    }

    /// Register a standard; used by tooling and tests, not by translation.
    pub async fn save_standard(&self, name: &str, body: &str) -> Result<()> {
        write_atomic(&self.json_path(STANDARDS_DIR, name), body.as_bytes()).await
    }

    fn json_path(&self, dir: &str, name: &str) -> PathBuf {
        self.root.join(dir).join(format!("{}.json", safe_name(name)))
    }

    fn plain_path(&self, dir: &str, name: &str) -> PathBuf {
        self.root.join(dir).join(safe_name(name))
    }
}

#[async_trait]
impl SchemaStore for FsSchemaStore {
    async fn get_standard(&self, name: &str) -> Result<Option<String>> {
        read_optional(&self.json_path(STANDARDS_DIR, name)).await
    }

    async fn get_example(&self, name: &str) -> Result<Option<String>> {
        read_optional(&self.json_path(EXAMPLES_DIR, name)).await
    }

    async fn save_example(&self, name: &str, body: &str) -> Result<()> {
        write_atomic(&self.json_path(EXAMPLES_DIR, name), body.as_bytes()).await
    }

    async fn save_raw_input(&self, name: &str, skeleton: &str) -> Result<()> {
        write_atomic(&self.plain_path(INPUT_DIR, name), skeleton.as_bytes()).await
    }

    async fn save_query(&self, name: &str, query: &str) -> Result<()> {
        write_atomic(&self.plain_path(QUERIES_DIR, name), query.as_bytes()).await
    }

    async fn load_mapping(&self, name: &str) -> Result<Option<String>> {
        read_optional(&self.json_path(MAPPINGS_DIR, name)).await
    }

    async fn save_mapping(&self, name: &str, mapping: &str) -> Result<()> {
        write_atomic(&self.json_path(MAPPINGS_DIR, name), mapping.as_bytes()).await
    }
}

async fn read_optional(path: &Path) -> Result<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => Ok(Some(text)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(EngineError::storage(format!(
            "failed to read {}: {err}",
            path.display()
        ))),
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, bytes).await?;
    if let Err(err) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(EngineError::storage(format!(
            "failed to write {}: {err}",
            path.display()
        )));
    }
    Ok(())
}
