use std::io;

use thiserror::Error;

/// Failures raised by the state, cache, and file stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid store state: {0}")]
    Invalid(String),
}

pub type StoreResult<T> = Result<T, StoreError>;
