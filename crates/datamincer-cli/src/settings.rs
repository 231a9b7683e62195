use std::path::{Path, PathBuf};

use datamincer_engine::EngineOptions;

use crate::CliError;

/// Settings file read from the working directory when no `--config` is given.
pub const DEFAULT_CONFIG: &str = "datamincer.toml";

/// Loads engine options from `path`, or from `datamincer.toml` when it exists.
/// Missing keys keep their defaults.
pub fn load_options(path: Option<&Path>) -> Result<EngineOptions, CliError> {
    let (path, explicit) = match path {
        Some(path) => (path.to_path_buf(), true),
        None => (PathBuf::from(DEFAULT_CONFIG), false),
    };
    if !path.exists() {
        if explicit {
            return Err(CliError::InvalidConfig(format!(
                "settings file {} not found",
                path.display()
            )));
        }
        return Ok(EngineOptions::default());
    }
    let content = std::fs::read_to_string(&path)?;
    parse_options(&content)
}

pub fn parse_options(content: &str) -> Result<EngineOptions, CliError> {
    Ok(toml::from_str(content)?)
}
