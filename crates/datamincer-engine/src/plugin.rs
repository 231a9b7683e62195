use std::cell::RefCell;

use indexmap::IndexMap;
use serde_json::Value;

use datamincer_store::{Cache, FileManager, State};

use crate::errors::{EngineError, EngineResult};
use crate::evaluate::{PathFilter, evaluate_children};
use crate::field::{field_value, resolve_node, resolve_params};
use crate::model::TaskInfo;
use crate::tree::{InstanceCore, InstanceId, Node, PluginTree};

/// Items a worker produces for one upstream input, pulled until exhausted.
pub type ItemStream<'a> = Box<dyn Iterator<Item = EngineResult<Value>> + 'a>;

/// Per-stage lists of produced items, keyed by worker name.
pub type WorkerResults = IndexMap<String, Vec<Value>>;

/// Behaviour shared by every plugin instance.
pub trait Plugin {
    /// Called once per instance, after its nested plugins were initialized.
    fn initialize(&self, _ctx: &EvalContext<'_>) -> EngineResult<()> {
        Ok(())
    }

    /// Evaluates the instance against `data`, by default every config leaf.
    fn evaluate(&self, ctx: &EvalContext<'_>, data: &Value) -> EngineResult<Value> {
        evaluate_children(ctx, data, &PathFilter::default())
    }

    fn as_field(&self) -> Option<&dyn Field> {
        None
    }

    fn as_worker(&self) -> Option<&dyn Worker> {
        None
    }

    fn as_generator(&self) -> Option<&dyn Generator> {
        None
    }

    fn as_service(&self) -> Option<&dyn Service> {
        None
    }

    fn as_unit(&self) -> Option<&dyn Unit> {
        None
    }
}

/// A plugin computing a single value from its context.
pub trait Field {
    fn get_value(&self, ctx: &EvalContext<'_>, data: &Value) -> EngineResult<Value>;
}

/// A pipeline stage.
pub trait Worker {
    /// Produces the items derived from one upstream `input`.
    fn process<'a>(
        &'a self,
        _ctx: EvalContext<'a>,
        _config: &'a Value,
        input: Value,
    ) -> EngineResult<ItemStream<'a>> {
        Ok(Box::new(std::iter::once(Ok(input))))
    }

    /// Receives every item the stage recorded once the stream is exhausted.
    fn finalize(&self, _ctx: &EvalContext<'_>, _config: &Value, _results: &[Value]) -> EngineResult<()> {
        Ok(())
    }

    fn buffering(&self) -> Option<&dyn BufferingWorker> {
        None
    }
}

/// A worker that accumulates items and forwards them downstream as batches.
pub trait BufferingWorker {
    /// Whether the next item should still go into the buffer.
    fn is_buffering(&self) -> bool;

    fn is_buffer_empty(&self) -> bool;

    fn buffer_item(&self, item: Value);

    /// Drains the buffer into one batch.
    fn process_buffer(&self) -> Value;

    /// Drops whatever an aborted run left in the buffer.
    fn clear_buffer(&self) {
        if !self.is_buffer_empty() {
            self.process_buffer();
        }
    }
}

/// A plugin driving a worker chain.
pub trait Generator {
    fn process(&self, ctx: &EvalContext<'_>, data: &Value, global: &Value) -> EngineResult<WorkerResults> {
        crate::pipeline::run_workers(ctx, data, global)
    }
}

/// A plugin other plugins call into through dependencies.
pub trait Service {
    fn request(&self, ctx: &EvalContext<'_>, operation: &str, args: &Value) -> EngineResult<Value>;
}

/// Top-level plugin of a product.
pub trait Unit {
    fn id(&self) -> Option<&str>;

    fn tasks(&self) -> Vec<TaskInfo>;

    fn run_task(&self, ctx: &EvalContext<'_>, task: &str, args: &[String]) -> EngineResult<Value>;

    fn summary(&self, ctx: &EvalContext<'_>) -> String;
}

/// Handle on one instance of a plugin tree during evaluation.
#[derive(Clone, Copy)]
pub struct EvalContext<'t> {
    tree: &'t PluginTree,
    id: InstanceId,
}

impl<'t> EvalContext<'t> {
    pub fn new(tree: &'t PluginTree, id: InstanceId) -> Self {
        Self { tree, id }
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn tree(&self) -> &'t PluginTree {
        self.tree
    }

    pub fn core(&self) -> &'t InstanceCore {
        &self.tree.instance(self.id).core
    }

    pub fn plugin(&self) -> &'t dyn Plugin {
        self.tree.instance(self.id).plugin.as_ref()
    }

    /// Context of another instance of the same tree.
    pub fn at(&self, id: InstanceId) -> EvalContext<'t> {
        Self::new(self.tree, id)
    }

    pub fn error(&self, message: impl Into<String>) -> EngineError {
        self.core().error(message)
    }

    /// Evaluates this instance; fields go through value caching.
    pub fn evaluate(&self, data: &Value) -> EngineResult<Value> {
        let plugin = self.plugin();
        match plugin.as_field() {
            Some(field) => field_value(self, field, data),
            None => plugin.evaluate(self, data),
        }
    }

    /// Resolves a config node against `data`, evaluating nested plugins.
    pub fn resolve(&self, node: &Node, data: &Value) -> EngineResult<Value> {
        resolve_node(self, data, node)
    }

    /// Resolves `@` references inside an already evaluated value.
    pub fn resolve_params(&self, params: &Value, data: &Value) -> EngineResult<Value> {
        resolve_params(self, data, params)
    }

    /// Resolves the config entry `key`, or `None` when it is absent.
    pub fn resolve_key(&self, key: &str, data: &Value) -> EngineResult<Option<Value>> {
        self.core()
            .get(key)
            .map(|node| self.resolve(node, data))
            .transpose()
    }

    /// Dependency of `plugin_type` wired under argument `name`.
    pub fn dependency(&self, plugin_type: &str, name: &str) -> Option<EvalContext<'t>> {
        self.core()
            .dependencies()
            .get(plugin_type)
            .and_then(|deps| deps.get(name))
            .map(|id| self.at(*id))
    }

    /// First dependency of `plugin_type`, whatever its argument name.
    pub fn default_dependency(&self, plugin_type: &str) -> Option<EvalContext<'t>> {
        self.core()
            .dependencies()
            .get(plugin_type)
            .and_then(|deps| deps.values().next())
            .map(|id| self.at(*id))
    }

    pub fn worker(&self) -> EngineResult<&'t dyn Worker> {
        self.plugin()
            .as_worker()
            .ok_or_else(|| self.error("plugin is not a worker"))
    }

    pub fn generator(&self) -> EngineResult<&'t dyn Generator> {
        self.plugin()
            .as_generator()
            .ok_or_else(|| self.error("plugin is not a generator"))
    }

    pub fn service(&self) -> EngineResult<&'t dyn Service> {
        self.plugin()
            .as_service()
            .ok_or_else(|| self.error("plugin is not a service"))
    }

    pub fn unit(&self) -> EngineResult<&'t dyn Unit> {
        self.plugin()
            .as_unit()
            .ok_or_else(|| self.error("plugin is not a unit"))
    }

    pub fn state(&self) -> &'t RefCell<State> {
        &self.core().handles.state
    }

    pub fn cache(&self) -> &'t RefCell<Cache> {
        &self.core().handles.cache
    }

    pub fn files(&self) -> &'t FileManager {
        &self.core().handles.files
    }
}
