//! Per-item translation of list inputs against a list standard.

use crate::cancel::CancelToken;
use crate::error::{EngineError, Result};
use crate::translator::{TranslateOptions, Translator};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The list to translate: the body itself, or the first array-valued field
/// (sorted key order) of an object body.
pub fn extract_items(body: Value) -> Vec<Value> {
    match body {
        Value::Array(items) => items,
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let Some(key) = keys
                .into_iter()
                .find(|key| map.get(key.as_str()).is_some_and(Value::is_array))
                .cloned()
            else {
                return Vec::new();
            };
            log::debug!("Translating list found under '{key}'");
            let mut map = map;
            match map.remove(&key) {
                Some(Value::Array(items)) => items,
                _ => Vec::new(),
            }
        }
        _ => Vec::new(),
    }
}

/// Translate every item of `body` into `sub_standard`.
///
/// Item 0 runs first and alone so the mapping for the common shape is learned
/// once; the rest run concurrently. A failed item is logged and left out, and
/// output order follows input order.
pub async fn translate_list(
    translator: &Translator,
    sub_standard: &str,
    body: Value,
    options: &TranslateOptions,
    cancel: &CancelToken,
) -> Result<Value> {
    let mut items = extract_items(body);
    if items.is_empty() {
        log::debug!("No list found for sub-standard '{sub_standard}'; returning []");
        return Ok(Value::Array(Vec::new()));
    }

    let config = translator.config();
    if items.len() > config.fanout_cap {
        log::warn!(
            "List of {} items truncated to the first {} for '{sub_standard}'",
            items.len(),
            config.fanout_cap
        );
        items.truncate(config.fanout_cap);
    }

    let item_options = TranslateOptions {
        skip_substandard: true,
        ..options.clone()
    };
    let total = items.len();
    let mut slots: Vec<Option<Value>> = vec![None; total];
    let mut items = items.into_iter();

    if let Some(first) = items.next() {
        let outcome = translate_item(
            translator.clone(),
            sub_standard.to_string(),
            first,
            item_options.clone(),
            cancel.clone(),
        )
        .await;
        slots[0] = settle(0, sub_standard, outcome)?;
    }

    let semaphore = Arc::new(Semaphore::new(config.fanout_concurrency.max(1)));
    let mut tasks = JoinSet::new();
    for (offset, item) in items.enumerate() {
        let index = offset + 1;
        let semaphore = semaphore.clone();
        let job = translate_item(
            translator.clone(),
            sub_standard.to_string(),
            item,
            item_options.clone(),
            cancel.clone(),
        );
        tasks.spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return (index, Err(EngineError::Cancelled));
            };
            (index, job.await)
        });
    }

    loop {
        let joined = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tasks.abort_all();
                return Err(EngineError::Cancelled);
            }
            joined = tasks.join_next() => joined,
        };
        let Some(joined) = joined else {
            break;
        };
        match joined {
            Ok((index, outcome)) => slots[index] = settle(index, sub_standard, outcome)?,
            Err(err) => log::error!("Fan-out task for '{sub_standard}' failed: {err}"),
        }
    }

    let translated: Vec<Value> = slots.into_iter().flatten().collect();
    log::debug!(
        "Translated {}/{total} items into '{sub_standard}'",
        translated.len()
    );
    Ok(Value::Array(translated))
}

fn translate_item(
    translator: Translator,
    standard: String,
    item: Value,
    options: TranslateOptions,
    cancel: CancelToken,
) -> BoxFuture<'static, Result<Value>> {
    Box::pin(async move {
        translator
            .translate_value(&standard, item, &options, &cancel)
            .await
            .map(|outcome| outcome.document)
    })
}

fn settle(index: usize, standard: &str, outcome: Result<Value>) -> Result<Option<Value>> {
    match outcome {
        Ok(value) => Ok(Some(value)),
        Err(EngineError::Cancelled) => Err(EngineError::Cancelled),
        Err(err) => {
            log::warn!("Item {index} could not be translated into '{standard}': {err}");
            Ok(None)
        }
    }
}
