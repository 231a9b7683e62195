use std::sync::LazyLock;
use std::time::Instant;

use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

use datamincer_core::{
    PartialTable, SchemaChildren, SchemaNode, extend_missing, merge_missing_map,
};

use crate::errors::{Diagnostics, EngineResult};
use crate::registry::{PluginDescriptor, PluginRegistry};
use crate::tree::{MIXIN_KEY, PLUGIN_ARGS_KEY, PLUGIN_TYPE_KEY};

static SELECTOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([^(]+)(?:\((.+)\))?$").expect("selector pattern is valid"));

static ARG_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",\s*").expect("argument separator pattern is valid"));

/// Splits a plugin selector `name(arg1, arg2)` into its name and arguments.
pub fn parse_selector(selector: &str) -> Option<(String, Vec<String>)> {
    let captures = SELECTOR.captures(selector)?;
    let name = captures.get(1)?.as_str().trim().to_string();
    let args = captures
        .get(2)
        .map(|args| {
            ARG_SEPARATOR
                .split(args.as_str())
                .map(|arg| arg.trim().to_string())
                .collect()
        })
        .unwrap_or_default();
    Some((name, args))
}

/// Result of compiling a configuration document.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledConfig {
    pub config: Value,
    pub schema: SchemaNode,
    pub partials: PartialTable,
}

/// Expands raw configuration against a schema, selecting plugins and merging
/// their defaults and schema contributions.
pub struct Compiler<'r> {
    registry: &'r PluginRegistry,
    diagnostics: Diagnostics,
}

impl<'r> Compiler<'r> {
    pub fn new(registry: &'r PluginRegistry, diagnostics: Diagnostics) -> Self {
        Self {
            registry,
            diagnostics,
        }
    }

    pub fn compile(
        &self,
        config: &Value,
        schema: &SchemaNode,
        partials: &PartialTable,
    ) -> EngineResult<CompiledConfig> {
        let start = Instant::now();
        let mut partials = partials.clone();
        let (config, schema) = self.compile_node(config.clone(), schema, &mut partials)?;
        debug!(
            partials = partials.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "configuration compiled"
        );
        Ok(CompiledConfig {
            config,
            schema,
            partials,
        })
    }

    fn compile_node(
        &self,
        config: Value,
        schema: &SchemaNode,
        partials: &mut PartialTable,
    ) -> EngineResult<(Value, SchemaNode)> {
        match schema {
            SchemaNode::Prototype { .. } => self.compile_prototype(config, schema, partials),
            SchemaNode::Array { .. } => self.compile_array(config, schema, partials, None),
            SchemaNode::Partial { partial, .. } => {
                self.compile_partial(config, partial, schema, partials)
            }
            _ => Ok((config, schema.clone())),
        }
    }

    fn compile_prototype(
        &self,
        config: Value,
        schema: &SchemaNode,
        partials: &mut PartialTable,
    ) -> EngineResult<(Value, SchemaNode)> {
        let SchemaNode::Prototype {
            required,
            prototype,
            ..
        } = schema
        else {
            return Ok((config, schema.clone()));
        };
        let config = match config {
            Value::Array(items) if !prototype.is_scalar() => Value::Object(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(index, item)| (index.to_string(), item))
                    .collect(),
            ),
            other => other,
        };
        match config {
            Value::Null => Ok((
                Value::Object(Map::new()),
                SchemaNode::Array {
                    required: *required,
                    children: SchemaChildren::new(),
                },
            )),
            Value::Object(entries) => {
                let mut compiled = Map::new();
                let mut children = SchemaChildren::new();
                for (key, value) in entries {
                    let (value, child) = self.compile_node(value, prototype, partials)?;
                    compiled.insert(key.clone(), value);
                    children.insert(key, child);
                }
                Ok((
                    Value::Object(compiled),
                    SchemaNode::Array {
                        required: *required,
                        children,
                    },
                ))
            }
            // Sequences of plain values stay sequences.
            Value::Array(items) => {
                let compiled = items
                    .into_iter()
                    .map(|item| self.compile_node(item, prototype, partials).map(|(value, _)| value))
                    .collect::<EngineResult<Vec<_>>>()?;
                Ok((Value::Array(compiled), schema.clone()))
            }
            other => Err(self.diagnostics.config_error(
                "prototype config must be a mapping",
                Some(&other),
                Some(schema),
            )),
        }
    }

    fn compile_array(
        &self,
        config: Value,
        schema: &SchemaNode,
        partials: &mut PartialTable,
        plugin: Option<&dyn PluginDescriptor>,
    ) -> EngineResult<(Value, SchemaNode)> {
        let SchemaNode::Array { required, children } = schema else {
            return Ok((config, schema.clone()));
        };
        let mut children = children.clone();
        let mut config = config;

        if let Some(plugin) = plugin {
            let mut extra = plugin.schema_children();
            extra.insert(PLUGIN_TYPE_KEY.to_string(), SchemaNode::text());
            extra.insert(
                PLUGIN_ARGS_KEY.to_string(),
                SchemaNode::prototype(SchemaNode::text()).optional(),
            );
            let mixin_schema = plugin.mixin_schema();
            if let Some(mixin_schema) = &mixin_schema {
                extra.insert(MIXIN_KEY.to_string(), mixin_schema.clone());
            }
            extend_missing(&mut children, extra);
            extend_missing(partials, plugin.schema_partials());
            if let Value::Object(map) = &mut config {
                merge_missing_map(map, &plugin.default_config(None));
                if mixin_schema.is_some() {
                    map.insert(MIXIN_KEY.to_string(), plugin.mixin());
                }
            }
        }

        let Value::Object(entries) = config else {
            return Ok((
                config,
                SchemaNode::Array {
                    required: *required,
                    children,
                },
            ));
        };

        let mut compiled = Map::new();
        let mut compiled_children = SchemaChildren::new();
        for (key, value) in entries {
            match children.get(&key) {
                Some(child) => {
                    let (value, child) = self.compile_node(value, child, partials)?;
                    compiled.insert(key.clone(), value);
                    compiled_children.insert(key, child);
                }
                None => {
                    compiled.insert(key, value);
                }
            }
        }
        for (key, child) in children {
            compiled_children.entry(key).or_insert(child);
        }

        Ok((
            Value::Object(compiled),
            SchemaNode::Array {
                required: *required,
                children: compiled_children,
            },
        ))
    }

    fn compile_partial(
        &self,
        config: Value,
        name: &str,
        schema: &SchemaNode,
        partials: &mut PartialTable,
    ) -> EngineResult<(Value, SchemaNode)> {
        let Some(partial) = partials.get(name).cloned() else {
            return Err(self.diagnostics.config_error(
                format!("Partial \"{name}\" not found"),
                Some(&config),
                Some(schema),
            ));
        };
        let plugin_type = name;
        if !self.registry.has_type(plugin_type) {
            return Err(self.diagnostics.config_error(
                format!("Plugin type \"{plugin_type}\" not found"),
                Some(&config),
                Some(schema),
            ));
        }

        let config = if config.is_null() {
            Value::String(String::new())
        } else {
            config
        };
        let mut map = match config {
            Value::Object(map) if map.contains_key(plugin_type) => map,
            Value::Object(mut map) => {
                let default = self.default_plugin(plugin_type, &Value::Object(map.clone()), schema)?;
                merge_missing_map(&mut map, &default.default_config(None));
                map
            }
            other @ Value::Array(_) => {
                return Err(self.diagnostics.config_error(
                    format!("{plugin_type} config must be an assoc array"),
                    Some(&other),
                    Some(schema),
                ));
            }
            scalar => self
                .default_plugin(plugin_type, &scalar, schema)?
                .default_config(Some(&scalar)),
        };

        let selector = map
            .get(plugin_type)
            .and_then(Value::as_str)
            .map(str::to_string);
        let Some(selector) = selector else {
            return Err(self.diagnostics.config_error(
                format!("{plugin_type} selector must be text"),
                Some(&Value::Object(map)),
                Some(schema),
            ));
        };
        let Some((plugin_id, args)) = parse_selector(&selector) else {
            return Err(self.diagnostics.config_error(
                format!("Invalid {plugin_type} selector \"{selector}\""),
                Some(&Value::Object(map)),
                Some(schema),
            ));
        };
        let Some(descriptor) = self.registry.get(plugin_type, &plugin_id) else {
            return Err(self.diagnostics.config_error(
                format!("{plugin_type} plugin \"{plugin_id}\" not found"),
                Some(&Value::Object(map)),
                Some(schema),
            ));
        };
        let Some(shape) = partial.plugin_shape() else {
            return Err(self.diagnostics.config_error(
                format!("Partial \"{name}\" does not describe a plugin"),
                None,
                Some(&partial),
            ));
        };

        map.insert(plugin_type.to_string(), Value::String(plugin_id));
        map.insert(
            PLUGIN_ARGS_KEY.to_string(),
            Value::Array(args.into_iter().map(Value::String).collect()),
        );
        map.insert(PLUGIN_TYPE_KEY.to_string(), Value::String(plugin_type.to_string()));

        let (config, mut compiled) =
            self.compile_array(Value::Object(map), shape, partials, Some(descriptor))?;
        compiled.set_required(schema.is_required());
        Ok((config, compiled))
    }

    fn default_plugin(
        &self,
        plugin_type: &str,
        config: &Value,
        schema: &SchemaNode,
    ) -> EngineResult<&'r dyn PluginDescriptor> {
        self.registry.default_for(plugin_type).ok_or_else(|| {
            self.diagnostics.config_error(
                format!("No default {plugin_type} plugin registered"),
                Some(config),
                Some(schema),
            )
        })
    }
}
