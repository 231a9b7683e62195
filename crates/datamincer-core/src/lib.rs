//! Core contracts and helpers for DataMincer.
//!
//! This crate defines the configuration schema model, path expressions, merge
//! helpers, and the schema validation oracle shared by the engine and the CLI.

pub mod error;
pub mod merge;
pub mod path;
pub mod schema;
pub mod validation;

pub use error::{Error, Result};
pub use merge::{merge_missing, merge_missing_map, merge_overlay, union};
pub use path::{QualifiedName, parse_path, reference_chunks, split_reference, strip_up_levels};
pub use schema::{PartialTable, SchemaChildren, SchemaNode, extend_missing};
pub use validation::{JsonSchemaValidator, SchemaValidator, ValidationIssue, to_json_schema};
