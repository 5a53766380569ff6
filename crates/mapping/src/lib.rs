//! # Schemaless Mapping
//!
//! Shape-level building blocks for translating arbitrary JSON/YAML documents
//! into a named standard.
//!
//! ## Pipeline
//!
//! ```text
//! Raw bytes (JSON or YAML)
//!     │
//!     ├──> normalize      YAML → JSON, code-fence cleanup
//!     │
//!     ├──> fingerprint    value-free skeleton + sorted key token
//!     │
//!     ├──> reverse        example pair → target-key/source-path table
//!     │
//!     └──> apply          MappingTable × document → standard document
//!                            └─> path::read / path::write (`a.b.#2.c`)
//! ```
//!
//! ## Example
//!
//! ```rust
//! use schemaless_mapping::{apply, fingerprint_bytes, FingerprintOptions, MappingTable};
//!
//! let raw = br#"{"title": "Hi", "id": "1234"}"#;
//! let shape = fingerprint_bytes(raw, &FingerprintOptions::default()).unwrap();
//! assert_eq!(shape.token, "idtitle");
//!
//! let mapping = MappingTable::from_json_str(r#"{"message": "title", "identifier": "id"}"#).unwrap();
//! let input = serde_json::from_slice(raw).unwrap();
//! let applied = apply(&input, &mapping).unwrap();
//! assert_eq!(applied.translated["message"], "Hi");
//! ```

mod apply;
mod error;
pub mod fingerprint;
pub mod normalize;
pub mod path;
pub mod reverse;

pub use apply::{apply, Applied, MappingRef, MappingTable};
pub use error::{kind_name, MappingError, Result};
pub use fingerprint::{
    fingerprint, fingerprint_bytes, ArrayPolicy, FingerprintOptions, StructuralFingerprint,
};
pub use normalize::{normalize_document, strip_code_fences};
pub use path::{PathExpression, Segment};
pub use reverse::{reverse_translate, reverse_translate_str, ReverseMapping};
