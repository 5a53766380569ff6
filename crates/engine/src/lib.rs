//! # Schemaless Engine
//!
//! Translates arbitrary JSON/YAML documents into named standards.
//!
//! A mapping (standard key → source path) is learned once per input *shape*
//! and reused for every later document of that shape:
//!
//! ```text
//! body ─> normalize ─> fingerprint ─> mapping cache ──hit──────────────┐
//!                                        │ miss                         │
//!                                        ├─> stored mapping / example ──┤
//!                                        ├─> standard is a list? ─> fan-out per item
//!                                        └─> model (retry, cancel) ─────┤
//!                                                                       v
//!                                                                     apply
//! ```
//!
//! [`Translator`] is the entry point. Its collaborators are injected: a
//! [`ChunkedCache`](schemaless_cache::ChunkedCache), a [`SchemaStore`] and a
//! [`MappingModel`].

mod cancel;
pub mod config;
mod error;
pub mod fanout;
pub mod keys;
pub mod model;
mod single_flight;
pub mod standard;
pub mod storage;
mod translator;

pub use cancel::CancelToken;
pub use config::EngineConfig;
pub use error::{EngineError, Result};
pub use model::{
    MappingModel, MappingPrompt, ModelError, OpenAiChatModel, OpenAiConfig, RetryPolicy,
};
pub use single_flight::KeyedLocks;
pub use standard::StandardSchema;
pub use storage::{FsSchemaStore, SchemaStore};
pub use translator::{
    has_output, MappingSource, TranslateOptions, TranslationOutcome, Translator,
};
