use std::fmt;

use serde::Serialize;
use thiserror::Error;

use datamincer_core::SchemaNode;
use datamincer_store::StoreError;

/// Errors emitted while compiling, wiring, or running a product.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Configuration(ConfigurationError),
    #[error("dependency error: {0}")]
    Dependency(PluginFailure),
    #[error("{0}")]
    PluginRuntime(PluginFailure),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Core(#[from] datamincer_core::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(ConfigurationError {
            message: message.into(),
            details: None,
        })
    }
}

/// Compilation or validation failure, optionally carrying the offending fragments.
#[derive(Debug, Clone)]
pub struct ConfigurationError {
    pub message: String,
    /// YAML rendering of the config and schema at fault; filled in debug mode only.
    pub details: Option<String>,
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(details) = &self.details {
            write!(f, "\n{details}")?;
        }
        Ok(())
    }
}

/// Failure attributed to a specific plugin instance.
#[derive(Debug, Clone)]
pub struct PluginFailure {
    pub plugin_type: String,
    pub plugin_id: String,
    pub path: String,
    pub message: String,
}

impl fmt::Display for PluginFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} plugin '{}' error: {}\nLocation: {}",
            capitalize(&self.plugin_type),
            self.plugin_id,
            self.message,
            self.path
        )
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Builds configuration errors, attaching fragments when debugging.
#[derive(Debug, Clone, Copy, Default)]
pub struct Diagnostics {
    pub debug: bool,
}

impl Diagnostics {
    pub fn new(debug: bool) -> Self {
        Self { debug }
    }

    pub fn config_error(
        &self,
        message: impl Into<String>,
        config: Option<&serde_json::Value>,
        schema: Option<&SchemaNode>,
    ) -> EngineError {
        let details = if self.debug {
            let mut details = String::new();
            if let Some(config) = config {
                details.push_str(&render_fragment("Config", config));
            }
            if let Some(schema) = schema {
                details.push_str(&render_fragment("Schema", schema));
            }
            (!details.is_empty()).then_some(details)
        } else {
            None
        };
        EngineError::Configuration(ConfigurationError {
            message: message.into(),
            details,
        })
    }
}

fn render_fragment<T: Serialize>(label: &str, fragment: &T) -> String {
    let rendered = serde_yaml::to_string(fragment)
        .unwrap_or_else(|err| format!("<unrenderable: {err}>\n"));
    format!("{label}:\n{rendered}")
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn plugin_failure_names_type_id_and_location() {
        let failure = PluginFailure {
            plugin_type: "worker".to_string(),
            plugin_id: "csv_file".to_string(),
            path: "generators/main/workers/out".to_string(),
            message: "missing path".to_string(),
        };
        assert_eq!(
            failure.to_string(),
            "Worker plugin 'csv_file' error: missing path\nLocation: generators/main/workers/out"
        );
    }

    #[test]
    fn fragments_render_only_in_debug_mode() {
        let config = json!({"worker": "each"});
        let quiet = Diagnostics::new(false).config_error("bad", Some(&config), None);
        assert_eq!(quiet.to_string(), "configuration error: bad");

        let loud = Diagnostics::new(true).config_error("bad", Some(&config), Some(&SchemaNode::text()));
        let text = loud.to_string();
        assert!(text.contains("Config:\nworker: each"));
        assert!(text.contains("_type: text"));
    }
}
