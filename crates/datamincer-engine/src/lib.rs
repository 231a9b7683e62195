//! Plugin-driven data generation engine for DataMincer.
//!
//! Product configs are compiled against the schemas contributed by registered
//! plugins, instantiated as a tree of plugin instances, wired through their
//! declared dependencies, and run as unit tasks that drive worker chains.

pub mod compiler;
pub mod engine;
pub mod errors;
pub mod evaluate;
pub mod field;
pub mod model;
pub mod output;
pub mod pipeline;
pub mod plugin;
pub mod plugins;
pub mod registry;
pub mod resolver;
pub mod tree;

pub use compiler::{CompiledConfig, Compiler};
pub use engine::{Engine, Product, UNIT_TYPE, base_schema};
pub use errors::{ConfigurationError, Diagnostics, EngineError, EngineResult, PluginFailure};
pub use evaluate::{PathFilter, evaluate_children};
pub use model::{BundleInfo, EngineOptions, TaskInfo};
pub use pipeline::{Pipeline, Stage};
pub use plugin::{
    BufferingWorker, EvalContext, Field, Generator, ItemStream, Plugin, Service, Unit, Worker,
    WorkerResults,
};
pub use registry::{DependencySlot, PluginDescriptor, PluginRegistry};
pub use tree::{InstanceCore, InstanceId, MIXIN_KEY, Node, PluginTree};
