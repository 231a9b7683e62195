use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde_json::Value;
use sha1::{Digest, Sha1};
use tracing::debug;

use crate::atomic::{copy_file_atomic, write_bytes_atomic, write_json_atomic};
use crate::errors::{StoreError, StoreResult};

/// Bin used when callers do not name one.
pub const DEFAULT_BIN: &str = "default";

/// Index file kept in every bin directory.
pub const CACHE_INDEX: &str = "cache.index";

/// Content id of a cache key: lowercase sha1 hex.
pub fn content_id(key: &str) -> String {
    hex::encode(Sha1::digest(key.as_bytes()))
}

/// Content-addressed store of JSON blobs and files, namespaced by bin.
#[derive(Debug)]
pub struct Cache {
    root: PathBuf,
    bins: HashMap<String, CacheBin>,
}

impl Cache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            bins: HashMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn exists(&mut self, key: &str, bin: &str) -> StoreResult<bool> {
        Ok(self.bin(bin)?.exists(key))
    }

    pub fn get_data(&mut self, key: &str, bin: &str) -> StoreResult<Option<Value>> {
        self.bin(bin)?.get_data(key)
    }

    pub fn set_data(&mut self, key: &str, value: &Value, bin: &str) -> StoreResult<()> {
        self.bin(bin)?.set_data(key, value)
    }

    pub fn get_file(&mut self, key: &str, bin: &str) -> StoreResult<Option<PathBuf>> {
        Ok(self.bin(bin)?.get_file(key))
    }

    pub fn set_file(&mut self, key: &str, source: &Path, bin: &str) -> StoreResult<PathBuf> {
        self.bin(bin)?.set_file(key, source)
    }

    /// Unix timestamp of the last write for `key`, if cached.
    pub fn last_write(&mut self, key: &str, bin: &str) -> StoreResult<Option<i64>> {
        Ok(self.bin(bin)?.last_write(key))
    }

    fn bin(&mut self, name: &str) -> StoreResult<&mut CacheBin> {
        if !self.bins.contains_key(name) {
            let bin = CacheBin::open(self.root.join(name))?;
            self.bins.insert(name.to_string(), bin);
        }
        self.bins
            .get_mut(name)
            .ok_or_else(|| StoreError::Invalid(format!("cache bin '{name}' unavailable")))
    }
}

/// One cache namespace: a directory of content files plus an index of write times.
#[derive(Debug)]
pub struct CacheBin {
    dir: PathBuf,
    index: BTreeMap<String, i64>,
}

impl CacheBin {
    pub fn open(dir: PathBuf) -> StoreResult<Self> {
        let index_path = dir.join(CACHE_INDEX);
        let index = if index_path.exists() {
            let content = std::fs::read_to_string(&index_path)?;
            serde_json::from_str(&content)?
        } else {
            BTreeMap::new()
        };
        debug!(bin = %dir.display(), entries = index.len(), "cache bin opened");
        Ok(Self { dir, index })
    }

    pub fn exists(&self, key: &str) -> bool {
        self.index.contains_key(&content_id(key))
    }

    pub fn last_write(&self, key: &str) -> Option<i64> {
        self.index.get(&content_id(key)).copied()
    }

    pub fn get_data(&self, key: &str) -> StoreResult<Option<Value>> {
        let Some(path) = self.get_file(key) else {
            return Ok(None);
        };
        let content = std::fs::read(&path)?;
        Ok(Some(serde_json::from_slice(&content)?))
    }

    pub fn set_data(&mut self, key: &str, value: &Value) -> StoreResult<()> {
        let cid = content_id(key);
        let data = serde_json::to_vec(value)?;
        write_bytes_atomic(&self.dir.join(&cid), &data)?;
        self.touch(cid)
    }

    pub fn get_file(&self, key: &str) -> Option<PathBuf> {
        let cid = content_id(key);
        if !self.index.contains_key(&cid) {
            return None;
        }
        let path = self.dir.join(cid);
        path.exists().then_some(path)
    }

    pub fn set_file(&mut self, key: &str, source: &Path) -> StoreResult<PathBuf> {
        let cid = content_id(key);
        let path = self.dir.join(&cid);
        copy_file_atomic(source, &path)?;
        self.touch(cid)?;
        Ok(path)
    }

    fn touch(&mut self, cid: String) -> StoreResult<()> {
        self.index.insert(cid, Utc::now().timestamp());
        write_json_atomic(&self.dir.join(CACHE_INDEX), &self.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_id_is_sha1_hex() {
        assert_eq!(content_id("abc"), "a9993e364706816aba3e25717850c26c9cd0d89d");
    }
}
