use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Options shared by every product the engine initializes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    /// Directory holding the bundle definition.
    pub bundle_path: PathBuf,
    /// Root of generated artifacts (`build://`).
    pub build_path: PathBuf,
    /// Root of scratch files (`tmp://`).
    pub temp_path: PathBuf,
    /// Root of cache bins (`cache://`).
    pub cache_path: PathBuf,
    /// Root of persisted product state.
    pub state_path: PathBuf,
    /// Skip schema validation of compiled configuration.
    pub novalidate: bool,
    /// Attach config and schema fragments to configuration errors.
    pub debug: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        let scratch = std::env::temp_dir().join("datamincer");
        Self {
            bundle_path: PathBuf::from("."),
            build_path: PathBuf::from("build"),
            temp_path: scratch.join("tmp"),
            cache_path: scratch.join("cache"),
            state_path: scratch.join("state"),
            novalidate: false,
            debug: false,
        }
    }
}

/// Identity of the bundle a product belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleInfo {
    pub name: String,
    pub path: PathBuf,
}

/// Task a unit exposes to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskInfo {
    pub name: String,
    pub help: String,
}
