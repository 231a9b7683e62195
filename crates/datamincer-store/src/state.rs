use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::debug;

use crate::atomic::write_json_atomic;
use crate::errors::{StoreError, StoreResult};

/// File holding the persisted state of one product.
pub const STATE_FILE: &str = "state.json";

/// Persistent `(collection, key) -> value` map for one product.
///
/// Loaded once on open; every `set` rewrites the whole file.
#[derive(Debug)]
pub struct State {
    path: Option<PathBuf>,
    collections: Map<String, Value>,
}

impl State {
    /// Opens the state stored under `dir`, starting empty when no file exists yet.
    pub fn open(dir: &Path) -> StoreResult<Self> {
        let path = dir.join(STATE_FILE);
        let collections = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            match serde_json::from_str(&content)? {
                Value::Object(map) => map,
                _ => {
                    return Err(StoreError::Invalid(format!(
                        "state file {} is not a mapping",
                        path.display()
                    )));
                }
            }
        } else {
            Map::new()
        };
        debug!(path = %path.display(), collections = collections.len(), "state loaded");
        Ok(Self {
            path: Some(path),
            collections,
        })
    }

    /// State that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            collections: Map::new(),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn get(&self, collection: &str, key: &str) -> Option<&Value> {
        self.collections
            .get(collection)
            .and_then(|entries| entries.get(key))
    }

    pub fn set(&mut self, collection: &str, key: &str, value: Value) -> StoreResult<()> {
        let entries = self
            .collections
            .entry(collection.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entries.is_object() {
            *entries = Value::Object(Map::new());
        }
        if let Value::Object(entries) = entries {
            entries.insert(key.to_string(), value);
        }
        self.flush()
    }

    fn flush(&self) -> StoreResult<()> {
        match &self.path {
            Some(path) => write_json_atomic(path, &self.collections),
            None => Ok(()),
        }
    }
}
