use std::cell::{Cell, RefCell};
use std::rc::Rc;

use indexmap::IndexMap;
use serde_json::{Map, Value};
use tracing::debug;

use datamincer_core::{QualifiedName, merge_overlay};
use datamincer_store::{Cache, FileManager, State};

use crate::errors::{EngineError, EngineResult, PluginFailure};
use crate::plugin::{EvalContext, Plugin};
use crate::registry::PluginRegistry;

/// Index of a plugin instance inside its tree.
pub type InstanceId = usize;

/// Key marking a compiled mapping as a plugin config.
pub const PLUGIN_TYPE_KEY: &str = "_pluginType";

/// Key holding the positional dependency arguments of a plugin selector.
pub const PLUGIN_ARGS_KEY: &str = "_pluginArgs";

/// Key holding the mixin a plugin contributes to its own config.
pub const MIXIN_KEY: &str = "_mixin";

/// Configuration value after instantiation.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Leaf(Value),
    Map(IndexMap<String, Node>),
    Plugin(InstanceId),
}

impl Node {
    pub fn as_plugin(&self) -> Option<InstanceId> {
        match self {
            Node::Plugin(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_leaf(&self) -> Option<&Value> {
        match self {
            Node::Leaf(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&IndexMap<String, Node>> {
        match self {
            Node::Map(map) => Some(map),
            _ => None,
        }
    }

    fn collect_plugins(&self, out: &mut Vec<InstanceId>) {
        match self {
            Node::Plugin(id) => out.push(*id),
            Node::Map(map) => map.values().for_each(|node| node.collect_plugins(out)),
            Node::Leaf(_) => {}
        }
    }
}

/// Plugin instances nested anywhere in `config`, in document order.
pub fn nested_plugins(config: &IndexMap<String, Node>) -> Vec<InstanceId> {
    let mut out = Vec::new();
    for node in config.values() {
        node.collect_plugins(&mut out);
    }
    out
}

/// Store handles shared by every plugin of one product.
#[derive(Debug, Clone)]
pub struct Handles {
    pub state: Rc<RefCell<State>>,
    pub cache: Rc<RefCell<Cache>>,
    pub files: Rc<FileManager>,
}

/// Everything a plugin instance knows about itself.
#[derive(Debug)]
pub struct InstanceCore {
    pub name: String,
    pub plugin_type: String,
    pub plugin_id: String,
    /// Config keys leading from the root to this instance, own key included.
    pub path: Vec<String>,
    pub config: IndexMap<String, Node>,
    pub args: Vec<String>,
    pub handles: Handles,
    dependencies: IndexMap<String, IndexMap<String, InstanceId>>,
    data: Map<String, Value>,
    initialized: Cell<bool>,
}

impl InstanceCore {
    pub fn new(
        name: impl Into<String>,
        plugin_type: impl Into<String>,
        plugin_id: impl Into<String>,
        path: Vec<String>,
        config: IndexMap<String, Node>,
        args: Vec<String>,
        handles: Handles,
    ) -> Self {
        let name = name.into();
        let mut data = Map::new();
        data.insert("name".to_string(), Value::String(name.clone()));
        Self {
            name,
            plugin_type: plugin_type.into(),
            plugin_id: plugin_id.into(),
            path,
            config,
            args,
            handles,
            dependencies: IndexMap::new(),
            data,
            initialized: Cell::new(false),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Node> {
        self.config.get(key)
    }

    pub fn get_value(&self, key: &str) -> Option<&Value> {
        self.get(key).and_then(Node::as_leaf)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get_value(key).and_then(Value::as_str)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get_value(key).and_then(Value::as_u64)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get_value(key).and_then(Value::as_i64)
    }

    /// The `_mixin` entry the plugin's descriptor merged into its config.
    pub fn mixin(&self) -> EngineResult<&Node> {
        self.get(MIXIN_KEY)
            .ok_or_else(|| self.error("Plugin mixin doesn't exist"))
    }

    pub fn qualified_id(&self) -> QualifiedName {
        QualifiedName::parse(&self.plugin_id)
    }

    pub fn location(&self) -> String {
        self.path.join("/")
    }

    pub fn failure(&self, message: impl Into<String>) -> PluginFailure {
        PluginFailure {
            plugin_type: self.plugin_type.clone(),
            plugin_id: self.plugin_id.clone(),
            path: self.location(),
            message: message.into(),
        }
    }

    /// Runtime error attributed to this instance.
    pub fn error(&self, message: impl Into<String>) -> EngineError {
        EngineError::PluginRuntime(self.failure(message))
    }

    /// Data bag with the `{<type>: {name}}` identity entry on top.
    pub fn data(&self) -> Value {
        let mut identity = Map::new();
        identity.insert("name".to_string(), Value::String(self.name.clone()));
        let mut data = self.data.clone();
        data.insert(self.plugin_type.clone(), Value::Object(identity));
        Value::Object(data)
    }

    pub fn dependencies(&self) -> &IndexMap<String, IndexMap<String, InstanceId>> {
        &self.dependencies
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.get()
    }
}

/// A plugin together with its instance state.
pub struct PluginInstance {
    pub core: InstanceCore,
    pub plugin: Box<dyn Plugin>,
}

/// Arena of the plugin instances of one product.
pub struct PluginTree {
    instances: Vec<PluginInstance>,
    root: InstanceId,
    by_name: IndexMap<String, IndexMap<String, InstanceId>>,
    source: Value,
}

impl PluginTree {
    /// Instantiates every plugin of a compiled configuration, children first.
    pub fn instantiate(
        registry: &PluginRegistry,
        compiled: &Value,
        handles: Handles,
        name: &str,
    ) -> EngineResult<Self> {
        let mut builder = TreeBuilder {
            registry,
            handles,
            instances: Vec::new(),
            by_name: IndexMap::new(),
        };
        let root = match builder.build(compiled, name, &[])? {
            Node::Plugin(id) => id,
            _ => {
                return Err(EngineError::configuration(
                    "root configuration does not describe a plugin",
                ));
            }
        };
        debug!(instances = builder.instances.len(), "plugin tree instantiated");
        Ok(Self {
            instances: builder.instances,
            root,
            by_name: builder.by_name,
            source: compiled.clone(),
        })
    }

    pub fn root(&self) -> InstanceId {
        self.root
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Compiled configuration the tree was built from.
    pub fn source(&self) -> &Value {
        &self.source
    }

    pub fn instance(&self, id: InstanceId) -> &PluginInstance {
        &self.instances[id]
    }

    pub fn context(&self, id: InstanceId) -> EvalContext<'_> {
        EvalContext::new(self, id)
    }

    /// Looks up an instance by plugin type and instance name.
    pub fn find(&self, plugin_type: &str, name: &str) -> Option<InstanceId> {
        self.by_name
            .get(plugin_type)
            .and_then(|names| names.get(name))
            .copied()
    }

    /// Merges `data` into the data bag of `id` and every instance below it.
    pub fn set_data(&mut self, id: InstanceId, data: &Value) {
        let core = &mut self.instances[id].core;
        let mut bag = Value::Object(std::mem::take(&mut core.data));
        merge_overlay(&mut bag, data);
        if let Value::Object(map) = bag {
            core.data = map;
        }
        for child in nested_plugins(&self.instances[id].core.config) {
            self.set_data(child, data);
        }
    }

    pub(crate) fn set_dependencies(
        &mut self,
        id: InstanceId,
        dependencies: IndexMap<String, IndexMap<String, InstanceId>>,
    ) {
        self.instances[id].core.dependencies = dependencies;
    }

    /// Runs `initialize` on every instance exactly once, children first.
    pub fn initialize(&self) -> EngineResult<()> {
        self.initialize_instance(self.root)
    }

    fn initialize_instance(&self, id: InstanceId) -> EngineResult<()> {
        let instance = &self.instances[id];
        if instance.core.initialized.get() {
            return Ok(());
        }
        instance.core.initialized.set(true);
        for child in nested_plugins(&instance.core.config) {
            self.initialize_instance(child)?;
        }
        instance.plugin.initialize(&self.context(id))
    }
}

struct TreeBuilder<'r> {
    registry: &'r PluginRegistry,
    handles: Handles,
    instances: Vec<PluginInstance>,
    by_name: IndexMap<String, IndexMap<String, InstanceId>>,
}

impl TreeBuilder<'_> {
    fn build(&mut self, value: &Value, key: &str, parent_path: &[String]) -> EngineResult<Node> {
        let Value::Object(map) = value else {
            return Ok(Node::Leaf(value.clone()));
        };
        let mut path = parent_path.to_vec();
        path.push(key.to_string());

        let mut config = IndexMap::new();
        for (child_key, child) in map {
            if child_key == PLUGIN_TYPE_KEY || child_key == PLUGIN_ARGS_KEY {
                continue;
            }
            config.insert(child_key.clone(), self.build(child, child_key, &path)?);
        }

        let Some(plugin_type) = map.get(PLUGIN_TYPE_KEY).and_then(Value::as_str) else {
            return Ok(Node::Map(config));
        };
        let plugin_id = map
            .get(plugin_type)
            .and_then(Value::as_str)
            .ok_or_else(|| {
                EngineError::configuration(format!(
                    "{plugin_type} config at '{}' names no plugin",
                    path.join("/")
                ))
            })?;
        let descriptor = self.registry.get(plugin_type, plugin_id).ok_or_else(|| {
            EngineError::configuration(format!("{plugin_type} plugin '{plugin_id}' not found"))
        })?;
        let args = map
            .get(PLUGIN_ARGS_KEY)
            .and_then(Value::as_array)
            .map(|args| {
                args.iter()
                    .map(|arg| match arg {
                        Value::String(text) => text.clone(),
                        other => other.to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let core = InstanceCore::new(
            key,
            plugin_type,
            plugin_id,
            path,
            config,
            args,
            self.handles.clone(),
        );
        let plugin = descriptor.create(&core)?;
        let id = self.instances.len();
        self.instances.push(PluginInstance { core, plugin });
        self.by_name
            .entry(plugin_type.to_string())
            .or_default()
            .insert(key.to_string(), id);
        Ok(Node::Plugin(id))
    }
}
