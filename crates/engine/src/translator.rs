//! Request orchestration: shape lookup, mapping acquisition and application.

use crate::cancel::CancelToken;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::fanout;
use crate::keys;
use crate::model::{generate_with_retry, MappingModel, MappingPrompt};
use crate::single_flight::{KeyGuard, KeyedLocks};
use crate::standard::StandardSchema;
use crate::storage::SchemaStore;
use schemaless_cache::ChunkedCache;
use schemaless_mapping::{
    apply, fingerprint, kind_name, normalize_document, reverse_translate, Applied, MappingTable,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;

/// Per-request knobs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranslateOptions {
    /// Namespaces learned mappings, e.g. per tenant
    pub key_prefix: String,
    /// Treat list standards as plain standards (set for fan-out items)
    pub skip_substandard: bool,
}

impl TranslateOptions {
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            key_prefix: prefix.into(),
            ..Self::default()
        }
    }
}

/// Where the mapping used for a translation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingSource {
    Cache,
    Stored,
    /// Re-derived from a recorded input/output example
    Example,
    Generated,
    FanOut,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranslationOutcome {
    /// Document in the standard's shape
    pub document: Value,
    /// Input with the standard keys added; absent for list translations
    pub augmented: Option<Value>,
    pub source: MappingSource,
    /// Fingerprint token of the input; absent for list translations
    pub token: Option<String>,
}

struct ShapeKeys {
    token: String,
    cache_key: String,
    storage_name: String,
    skeleton: String,
}

/// Translates documents into named standards, learning one mapping per
/// input shape.
///
/// Cheap to clone; clones share the cache, storage, model and locks.
#[derive(Clone)]
pub struct Translator {
    cache: Arc<ChunkedCache>,
    store: Arc<dyn SchemaStore>,
    model: Arc<dyn MappingModel>,
    config: Arc<EngineConfig>,
    locks: Arc<KeyedLocks>,
}

impl Translator {
    pub fn new(
        cache: Arc<ChunkedCache>,
        store: Arc<dyn SchemaStore>,
        model: Arc<dyn MappingModel>,
        config: EngineConfig,
    ) -> Self {
        Self {
            cache,
            store,
            model,
            config: Arc::new(config),
            locks: Arc::new(KeyedLocks::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cache(&self) -> &ChunkedCache {
        &self.cache
    }

    /// Translate raw JSON or YAML bytes into `standard`.
    pub async fn translate(
        &self,
        standard: &str,
        body: &[u8],
        options: &TranslateOptions,
        cancel: &CancelToken,
    ) -> Result<TranslationOutcome> {
        cancel.check()?;
        let doc = normalize_document(body)?;
        self.translate_value(standard, doc, options, cancel).await
    }

    pub async fn translate_value(
        &self,
        standard: &str,
        doc: Value,
        options: &TranslateOptions,
        cancel: &CancelToken,
    ) -> Result<TranslationOutcome> {
        cancel.check()?;
        let standard = keys::standard_name(standard).to_string();
        if standard.is_empty() {
            return Err(EngineError::parse("standard name is empty"));
        }

        if !doc.is_object() {
            return self.translate_non_object(&standard, doc, options, cancel).await;
        }

        let shape = self.shape_keys(&standard, &doc, options)?;
        log::debug!("Translating into '{standard}' with shape token '{}'", shape.token);
        best_effort(
            "input skeleton",
            self.store.save_raw_input(&shape.storage_name, &shape.skeleton),
        )
        .await;

        cancel.check()?;
        if let Some(mapping) = self.cached_mapping(&shape.cache_key).await {
            return finish(doc, &mapping, MappingSource::Cache, shape.token);
        }

        let guard = self.single_flight(&shape.cache_key, cancel).await?;
        if guard.is_some() {
            if let Some(mapping) = self.cached_mapping(&shape.cache_key).await {
                log::debug!("Mapping for '{standard}' learned by a concurrent request");
                return finish(doc, &mapping, MappingSource::Cache, shape.token);
            }
        }

        if let Some((mapping, source)) = self.stored_mapping(&shape.storage_name).await {
            let applied = apply(&doc, &mapping)?;
            if has_output(&applied.translated) {
                self.seed_cache(&shape.cache_key, &mapping).await;
                return Ok(outcome(applied, source, shape.token));
            }
            log::warn!(
                "Stored mapping '{}' resolves nothing for this input; ignoring it",
                shape.storage_name
            );
        }

        cancel.check()?;
        let schema = self.fetch_schema(&standard).await?;
        if let Some(sub) = schema.sub_standard.as_deref() {
            if !options.skip_substandard {
                drop(guard);
                return self.fan_out(sub, doc, options, cancel).await;
            }
        }

        let mapping = self.generate_mapping(&schema, &shape, options, cancel).await?;
        match mapping.to_json_string() {
            Ok(text) => {
                best_effort(
                    "learned mapping",
                    self.store.save_mapping(&shape.storage_name, &text),
                )
                .await;
                self.seed_cache(&shape.cache_key, &mapping).await;
            }
            Err(err) => log::warn!("Failed to serialize mapping for '{standard}': {err}"),
        }
        finish(doc, &mapping, MappingSource::Generated, shape.token)
    }

    /// Learn the mapping for `source`'s shape from a matching output document.
    ///
    /// The mapping is stored and cached exactly like a generated one, so later
    /// inputs of the same shape never reach the model.
    pub async fn learn_from_example(
        &self,
        standard: &str,
        source: &Value,
        target: &Value,
        options: &TranslateOptions,
    ) -> Result<MappingTable> {
        let standard = keys::standard_name(standard).to_string();
        let shape = self.shape_keys(&standard, source, options)?;

        let mapping = MappingTable::from(reverse_translate(source, target)?);
        if mapping.is_empty() {
            return Err(EngineError::invalid_mapping(
                "example output shares no values with the input",
            ));
        }

        let text = mapping
            .to_json_string()
            .map_err(|err| EngineError::invalid_mapping(err.to_string()))?;
        self.store.save_mapping(&shape.storage_name, &text).await?;
        let example = json!({"input": source, "output": target}).to_string();
        best_effort(
            "example pair",
            self.store.save_example(&shape.storage_name, &example),
        )
        .await;
        self.seed_cache(&shape.cache_key, &mapping).await;

        log::info!(
            "Learned {} key(s) for '{standard}' from an example pair",
            mapping.len()
        );
        Ok(mapping)
    }

    async fn translate_non_object(
        &self,
        standard: &str,
        doc: Value,
        options: &TranslateOptions,
        cancel: &CancelToken,
    ) -> Result<TranslationOutcome> {
        let kind = kind_name(&doc);
        let schema = self.fetch_schema(standard).await?;
        match schema.sub_standard.as_deref() {
            Some(sub) if !options.skip_substandard => {
                self.fan_out(sub, doc, options, cancel).await
            }
            _ => Err(EngineError::parse(format!(
                "input root must be an object for '{standard}', found {kind}"
            ))),
        }
    }

    /// The sub-standard must exist before any item is attempted; a missing
    /// one fails the whole request instead of every item separately.
    async fn fan_out(
        &self,
        sub_standard: &str,
        doc: Value,
        options: &TranslateOptions,
        cancel: &CancelToken,
    ) -> Result<TranslationOutcome> {
        let sub_standard = keys::standard_name(sub_standard);
        self.fetch_schema(sub_standard).await?;
        let document = fanout::translate_list(self, sub_standard, doc, options, cancel).await?;
        Ok(list_outcome(document))
    }

    fn shape_keys(
        &self,
        standard: &str,
        doc: &Value,
        options: &TranslateOptions,
    ) -> Result<ShapeKeys> {
        let fp = fingerprint(doc, &self.config.fingerprint_options())?;
        let prefix = options.key_prefix.as_str();
        Ok(ShapeKeys {
            cache_key: keys::mapping_cache_key(prefix, standard, &fp.token),
            storage_name: keys::mapping_storage_name(prefix, standard, &fp.token),
            skeleton: serde_json::to_string(&fp.skeleton)?,
            token: fp.token,
        })
    }

    async fn single_flight(&self, key: &str, cancel: &CancelToken) -> Result<Option<KeyGuard>> {
        if !self.config.single_flight {
            return Ok(None);
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(EngineError::Cancelled),
            guard = self.locks.lock(key) => Ok(Some(guard)),
        }
    }

    async fn cached_mapping(&self, key: &str) -> Option<MappingTable> {
        match self.cache.get_refreshing(key, self.config.mapping_ttl).await {
            Ok(found) => found.and_then(|bytes| parse_cached(&bytes)),
            Err(err) => {
                log::warn!("Mapping cache read failed: {err}");
                None
            }
        }
    }

    async fn cached_response(&self, key: &str) -> Option<MappingTable> {
        match self.cache.get(key).await {
            Ok(found) => found.and_then(|bytes| parse_cached(&bytes)),
            Err(err) => {
                log::warn!("Model response cache read failed: {err}");
                None
            }
        }
    }

    async fn stored_mapping(&self, name: &str) -> Option<(MappingTable, MappingSource)> {
        match self.store.load_mapping(name).await {
            Ok(Some(text)) => match MappingTable::from_json_str(&text) {
                Ok(mapping) => return Some((mapping, MappingSource::Stored)),
                Err(err) => log::warn!("Stored mapping '{name}' is unreadable: {err}"),
            },
            Ok(None) => {}
            Err(err) => log::warn!("Stored mapping lookup failed: {err}"),
        }

        let example = match self.store.get_example(name).await {
            Ok(Some(text)) => text,
            Ok(None) => return None,
            Err(err) => {
                log::warn!("Stored example lookup failed: {err}");
                return None;
            }
        };
        let pair: Value = match serde_json::from_str(&example) {
            Ok(pair) => pair,
            Err(err) => {
                log::warn!("Stored example '{name}' is unreadable: {err}");
                return None;
            }
        };
        let (Some(input), Some(output)) = (pair.get("input"), pair.get("output")) else {
            return None;
        };
        match reverse_translate(input, output) {
            Ok(reverse) => {
                let mapping = MappingTable::from(reverse);
                (!mapping.is_empty()).then_some((mapping, MappingSource::Example))
            }
            Err(err) => {
                log::warn!("Stored example '{name}' could not be reverse-mapped: {err}");
                None
            }
        }
    }

    async fn seed_cache(&self, key: &str, mapping: &MappingTable) {
        let text = match mapping.to_json_string() {
            Ok(text) => text,
            Err(err) => {
                log::warn!("Failed to serialize mapping for cache: {err}");
                return;
            }
        };
        if let Err(err) = self
            .cache
            .set(key, text.as_bytes(), self.config.mapping_ttl)
            .await
        {
            log::warn!("Mapping cache write failed: {err}");
        }
    }

    async fn fetch_schema(&self, standard: &str) -> Result<StandardSchema> {
        let body = self
            .store
            .get_standard(standard)
            .await?
            .ok_or_else(|| EngineError::SchemaNotFound(standard.to_string()))?;
        StandardSchema::parse(standard, &body)
    }

    async fn generate_mapping(
        &self,
        schema: &StandardSchema,
        shape: &ShapeKeys,
        options: &TranslateOptions,
        cancel: &CancelToken,
    ) -> Result<MappingTable> {
        if !self.model.is_configured() {
            log::warn!(
                "No model credentials; saving standard '{}' as a placeholder mapping",
                schema.name
            );
            best_effort(
                "placeholder mapping",
                self.store.save_mapping(
                    &keys::placeholder_storage_name(&shape.storage_name),
                    &schema.raw,
                ),
            )
            .await;
            return Err(EngineError::ModelUnavailable(
                "model credentials are not configured".to_string(),
            ));
        }

        let size = shape.skeleton.chars().count();
        if size > self.config.max_input_chars {
            return Err(EngineError::InputTooLarge {
                size,
                limit: self.config.max_input_chars,
            });
        }

        let prompt = MappingPrompt::new(&schema.raw, &shape.skeleton);
        let query_key = keys::query_cache_key(&options.key_prefix, &prompt.system, &prompt.user);
        if let Some(mapping) = self.cached_response(&query_key).await {
            log::debug!("Reusing model response for '{}'", schema.name);
            return Ok(mapping);
        }

        best_effort(
            "model query",
            self.store.save_query(&shape.storage_name, &prompt.user),
        )
        .await;
        log::info!(
            "Requesting mapping for '{}' from {}",
            schema.name,
            self.model.name()
        );
        let text =
            generate_with_retry(self.model.as_ref(), &prompt, self.config.retry, cancel).await?;
        let mapping = MappingTable::from_json_str(&text)
            .map_err(|err| EngineError::invalid_mapping(err.to_string()))?;

        if let Err(err) = self
            .cache
            .set(&query_key, text.as_bytes(), self.config.query_ttl)
            .await
        {
            log::warn!("Model response cache write failed: {err}");
        }
        Ok(mapping)
    }
}

fn finish(
    doc: Value,
    mapping: &MappingTable,
    source: MappingSource,
    token: String,
) -> Result<TranslationOutcome> {
    let applied = apply(&doc, mapping)?;
    Ok(outcome(applied, source, token))
}

fn outcome(applied: Applied, source: MappingSource, token: String) -> TranslationOutcome {
    TranslationOutcome {
        document: applied.translated,
        augmented: Some(applied.augmented),
        source,
        token: Some(token),
    }
}

/// True unless the document is null or an empty object/array.
pub fn has_output(document: &Value) -> bool {
    match document {
        Value::Object(map) => !map.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Null => false,
        _ => true,
    }
}

fn parse_cached(bytes: &[u8]) -> Option<MappingTable> {
    let parsed = std::str::from_utf8(bytes)
        .map_err(|err| err.to_string())
        .and_then(|text| MappingTable::from_json_str(text).map_err(|err| err.to_string()));
    match parsed {
        Ok(mapping) => Some(mapping),
        Err(err) => {
            log::warn!("Ignoring unreadable cached mapping: {err}");
            None
        }
    }
}

fn list_outcome(document: Value) -> TranslationOutcome {
    TranslationOutcome {
        document,
        augmented: None,
        source: MappingSource::FanOut,
        token: None,
    }
}

async fn best_effort(what: &str, write: impl Future<Output = Result<()>>) {
    if let Err(err) = write.await {
        log::warn!("Failed to save {what}: {err}");
    }
}
