use thiserror::Error;

/// Core error type shared across DataMincer crates.
#[derive(Debug, Error)]
pub enum Error {
    /// A path expression could not be parsed.
    #[error("invalid path expression '{input}' at position {position}: {message}")]
    InvalidPath {
        input: String,
        position: usize,
        message: String,
    },
    /// A schema description is malformed.
    #[error("invalid schema: {0}")]
    InvalidSchema(String),
    /// Data failed validation against a compiled schema.
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience alias for results returned by DataMincer crates.
pub type Result<T> = std::result::Result<T, Error>;
