use std::fmt;

use indexmap::IndexMap;
use serde_json::{Map, Value};

use datamincer_core::{PartialTable, QualifiedName, SchemaChildren, SchemaNode};

use crate::errors::EngineResult;
use crate::plugin::Plugin;
use crate::tree::InstanceCore;

/// A dependency a plugin declares on another plugin of `plugin_type`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencySlot {
    pub plugin_type: String,
    pub name: QualifiedName,
}

impl DependencySlot {
    pub fn new(plugin_type: impl Into<String>, name: &str) -> Self {
        Self {
            plugin_type: plugin_type.into(),
            name: QualifiedName::parse(name),
        }
    }
}

impl fmt::Display for DependencySlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.plugin_type, self.name)
    }
}

/// Static description of a plugin: identity, schema contribution, and factory.
pub trait PluginDescriptor {
    fn plugin_type(&self) -> &str;

    fn plugin_id(&self) -> &str;

    /// Whether this plugin handles configs of its type that name no plugin.
    fn is_default(&self) -> bool {
        false
    }

    fn dependencies(&self) -> Vec<DependencySlot> {
        Vec::new()
    }

    /// Configuration merged under user config; `arg` is the scalar a config was
    /// written as, when it was.
    fn default_config(&self, _arg: Option<&Value>) -> Map<String, Value> {
        plugin_config(self.plugin_type(), self.plugin_id())
    }

    fn schema_children(&self) -> SchemaChildren {
        SchemaChildren::new()
    }

    fn schema_partials(&self) -> PartialTable {
        PartialTable::new()
    }

    /// Schema of the `_mixin` entry added to every config of this plugin.
    fn mixin_schema(&self) -> Option<SchemaNode> {
        None
    }

    /// Config stored under `_mixin` when `mixin_schema` is set. It is compiled
    /// like user config, so it may hold nested plugins.
    fn mixin(&self) -> Value {
        Value::Null
    }

    fn create(&self, core: &InstanceCore) -> EngineResult<Box<dyn Plugin>>;
}

/// Minimal config selecting `plugin_id` for `plugin_type`.
pub fn plugin_config(plugin_type: &str, plugin_id: &str) -> Map<String, Value> {
    let mut config = Map::new();
    config.insert(plugin_type.to_string(), Value::String(plugin_id.to_string()));
    config
}

/// Registry of plugin descriptors keyed by type, then id.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: IndexMap<String, IndexMap<String, Box<dyn PluginDescriptor>>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in plugin.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::plugins::register_builtins(&mut registry);
        registry
    }

    /// Registers a descriptor, replacing any previous one with the same identity.
    pub fn register(&mut self, descriptor: Box<dyn PluginDescriptor>) {
        self.plugins
            .entry(descriptor.plugin_type().to_string())
            .or_default()
            .insert(descriptor.plugin_id().to_string(), descriptor);
    }

    pub fn has_type(&self, plugin_type: &str) -> bool {
        self.plugins.contains_key(plugin_type)
    }

    pub fn get(&self, plugin_type: &str, plugin_id: &str) -> Option<&dyn PluginDescriptor> {
        self.plugins
            .get(plugin_type)
            .and_then(|plugins| plugins.get(plugin_id))
            .map(|descriptor| descriptor.as_ref())
    }

    pub fn default_for(&self, plugin_type: &str) -> Option<&dyn PluginDescriptor> {
        self.plugins
            .get(plugin_type)?
            .values()
            .find(|descriptor| descriptor.is_default())
            .map(|descriptor| descriptor.as_ref())
    }

    pub fn types(&self) -> impl Iterator<Item = &str> {
        self.plugins.keys().map(String::as_str)
    }

    pub fn ids(&self, plugin_type: &str) -> Vec<&str> {
        self.plugins
            .get(plugin_type)
            .map(|plugins| plugins.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (plugin_type, plugins) in &self.plugins {
            map.entry(plugin_type, &plugins.keys().collect::<Vec<_>>());
        }
        map.finish()
    }
}
