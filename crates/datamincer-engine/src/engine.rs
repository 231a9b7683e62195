use std::cell::RefCell;
use std::rc::Rc;
use std::time::Instant;

use serde_json::Value;
use tracing::{debug, info};

use datamincer_core::{JsonSchemaValidator, PartialTable, SchemaNode, SchemaValidator};
use datamincer_store::{Cache, FileManager, FileRoots, State};

use crate::compiler::{CompiledConfig, Compiler};
use crate::errors::{Diagnostics, EngineResult};
use crate::model::{BundleInfo, EngineOptions, TaskInfo};
use crate::plugin::EvalContext;
use crate::registry::PluginRegistry;
use crate::resolver::resolve_dependencies;
use crate::tree::{Handles, PluginTree};

/// Plugin type at the root of every product.
pub const UNIT_TYPE: &str = "unit";

/// Schema and partial table every product config is compiled against.
pub fn base_schema() -> (SchemaNode, PartialTable) {
    let mut partials = PartialTable::new();
    partials.insert(UNIT_TYPE.to_string(), SchemaNode::plugin_partial(UNIT_TYPE, false));
    (SchemaNode::partial(UNIT_TYPE), partials)
}

/// Entry point turning product configs into runnable plugin trees.
pub struct Engine {
    registry: PluginRegistry,
    options: EngineOptions,
    validator: Box<dyn SchemaValidator>,
}

impl Engine {
    pub fn new(registry: PluginRegistry, options: EngineOptions) -> Self {
        Self {
            registry,
            options,
            validator: Box::new(JsonSchemaValidator),
        }
    }

    pub fn with_validator(mut self, validator: Box<dyn SchemaValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    /// Compiles a product config against the base schema.
    pub fn compile(&self, config: &Value) -> EngineResult<CompiledConfig> {
        let (schema, partials) = base_schema();
        Compiler::new(&self.registry, self.diagnostics()).compile(config, &schema, &partials)
    }

    /// Compiles, validates, instantiates, wires, and initializes one product.
    ///
    /// Nothing is returned unless every step succeeds.
    pub fn init_unit(&self, config: &Value, bundle: &BundleInfo, data: &Value) -> EngineResult<Product> {
        let start = Instant::now();
        let compiled = self.compile(config)?;
        if !self.options.novalidate {
            self.validate(&compiled)?;
        }

        let handles = self.handles(bundle)?;
        let mut tree = PluginTree::instantiate(&self.registry, &compiled.config, handles, UNIT_TYPE)?;
        let root = tree.root();
        tree.set_data(root, data);
        resolve_dependencies(&mut tree, &self.registry)?;
        tree.initialize()?;

        let product = Product { tree };
        info!(
            bundle = %bundle.name,
            product = %product.id().unwrap_or_default(),
            plugins = product.tree.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "product initialized"
        );
        Ok(product)
    }

    fn validate(&self, compiled: &CompiledConfig) -> EngineResult<()> {
        let issues = self
            .validator
            .validate(&compiled.config, &compiled.schema, &compiled.partials)?;
        if issues.is_empty() {
            debug!("configuration validated");
            return Ok(());
        }
        let message = issues
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        Err(self.diagnostics().config_error(
            format!("Config validation error: {message}"),
            Some(&compiled.config),
            None,
        ))
    }

    fn handles(&self, bundle: &BundleInfo) -> EngineResult<Handles> {
        let state = State::open(&self.options.state_path.join(&bundle.name))?;
        let cache = Cache::new(self.options.cache_path.join(&bundle.name));
        let files = FileManager::new(FileRoots {
            bundle_name: bundle.name.clone(),
            bundle_path: bundle.path.clone(),
            build_path: self.options.build_path.clone(),
            temp_path: self.options.temp_path.clone(),
            cache_path: self.options.cache_path.clone(),
        });
        Ok(Handles {
            state: Rc::new(RefCell::new(state)),
            cache: Rc::new(RefCell::new(cache)),
            files: Rc::new(files),
        })
    }

    fn diagnostics(&self) -> Diagnostics {
        Diagnostics::new(self.options.debug)
    }
}

/// An initialized product: a plugin tree rooted at a unit.
pub struct Product {
    tree: PluginTree,
}

impl Product {
    pub fn tree(&self) -> &PluginTree {
        &self.tree
    }

    pub fn id(&self) -> Option<String> {
        self.unit_context()
            .unit()
            .ok()
            .and_then(|unit| unit.id().map(str::to_string))
    }

    pub fn tasks(&self) -> EngineResult<Vec<TaskInfo>> {
        Ok(self.unit_context().unit()?.tasks())
    }

    pub fn summary(&self) -> EngineResult<String> {
        let ctx = self.unit_context();
        Ok(ctx.unit()?.summary(&ctx))
    }

    pub fn run_task(&self, task: &str, args: &[String]) -> EngineResult<Value> {
        let ctx = self.unit_context();
        let unit = ctx.unit()?;
        if !unit.tasks().iter().any(|info| info.name == task) {
            return Err(ctx.error(format!("Unknown task '{task}'")));
        }
        let start = Instant::now();
        let output = unit.run_task(&ctx, task, args)?;
        info!(
            task = %task,
            duration_ms = start.elapsed().as_millis() as u64,
            "task finished"
        );
        Ok(output)
    }

    fn unit_context(&self) -> EvalContext<'_> {
        self.tree.context(self.tree.root())
    }
}
