use std::cell::OnceCell;

use serde_json::{Map, Value};
use sha1::{Digest, Sha1};
use tracing::info;

use datamincer_core::{PartialTable, SchemaChildren, SchemaNode, union};

use crate::errors::EngineResult;
use crate::evaluate::{PathFilter, evaluate_children};
use crate::model::TaskInfo;
use crate::plugin::{EvalContext, Plugin, Unit};
use crate::registry::PluginDescriptor;
use crate::tree::{InstanceCore, Node};

const GENERATORS_KEY: &str = "generators";
const GENERATE_TASK: &str = "generate";

/// Descriptor of the default unit.
pub struct DeckDescriptor;

impl PluginDescriptor for DeckDescriptor {
    fn plugin_type(&self) -> &str {
        "unit"
    }

    fn plugin_id(&self) -> &str {
        "deck"
    }

    fn is_default(&self) -> bool {
        true
    }

    fn schema_children(&self) -> SchemaChildren {
        let mut children = SchemaChildren::new();
        children.insert(
            "services".to_string(),
            SchemaNode::prototype(SchemaNode::partial("service")).optional(),
        );
        children.insert(
            GENERATORS_KEY.to_string(),
            SchemaNode::prototype(SchemaNode::partial("generator"))
                .min_items(1)
                .optional(),
        );
        children
    }

    fn schema_partials(&self) -> PartialTable {
        let mut partials = PartialTable::new();
        for plugin_type in ["service", "generator", "worker"] {
            partials.insert(
                plugin_type.to_string(),
                SchemaNode::plugin_partial(plugin_type, false),
            );
        }
        partials.insert("field".to_string(), SchemaNode::plugin_partial("field", true));
        partials
    }

    fn create(&self, _core: &InstanceCore) -> EngineResult<Box<dyn Plugin>> {
        Ok(Box::new(Deck::default()))
    }
}

/// A product built from services and generators.
#[derive(Default)]
pub struct Deck {
    id: OnceCell<String>,
}

impl Deck {
    fn generate(&self, ctx: &EvalContext<'_>, only: &[String]) -> EngineResult<Value> {
        let data = ctx.core().data();
        let evaluated = evaluate_children(ctx, &data, &PathFilter::excluding(&[&[GENERATORS_KEY]]))?;
        let data = union(&evaluated, &data);

        let mut output = Map::new();
        let generators = match ctx.core().get(GENERATORS_KEY) {
            Some(Node::Map(generators)) if !generators.is_empty() => generators,
            _ => return Ok(Value::Object(output)),
        };

        let unknown: Vec<&str> = only
            .iter()
            .map(String::as_str)
            .filter(|name| !generators.contains_key(*name))
            .collect();
        if !unknown.is_empty() {
            return Err(ctx.error(format!("Unknown generator(s): {}", unknown.join(", "))));
        }

        for (name, node) in generators {
            if !only.is_empty() && !only.iter().any(|wanted| wanted == name) {
                continue;
            }
            let Some(id) = node.as_plugin() else {
                continue;
            };
            info!(generator = %name, "running generator");
            let generator_ctx = ctx.at(id);
            let generator_data = generator_ctx.evaluate(&data)?;
            let results = generator_ctx
                .generator()?
                .process(&generator_ctx, &generator_data, &data)?;
            output.insert(name.clone(), serde_json::to_value(results)?);
        }
        Ok(Value::Object(output))
    }
}

impl Plugin for Deck {
    fn initialize(&self, ctx: &EvalContext<'_>) -> EngineResult<()> {
        let serialized = serde_json::to_string(ctx.tree().source())?;
        self.id
            .set(hex::encode(Sha1::digest(serialized.as_bytes())))
            .map_err(|_| ctx.error("unit is already initialized"))
    }

    fn as_unit(&self) -> Option<&dyn Unit> {
        Some(self)
    }
}

impl Unit for Deck {
    fn id(&self) -> Option<&str> {
        self.id.get().map(String::as_str)
    }

    fn tasks(&self) -> Vec<TaskInfo> {
        vec![TaskInfo {
            name: GENERATE_TASK.to_string(),
            help: "Generate records.".to_string(),
        }]
    }

    fn run_task(&self, ctx: &EvalContext<'_>, task: &str, args: &[String]) -> EngineResult<Value> {
        match task {
            GENERATE_TASK => self.generate(ctx, args),
            other => Err(ctx.error(format!("Unknown task '{other}'"))),
        }
    }

    fn summary(&self, ctx: &EvalContext<'_>) -> String {
        render_origin(&ctx.core().data())
    }
}

/// Short form of a product id.
pub fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

/// Renders `origin` data as `dimension=domain.value` pairs, prefixed with one
/// `:` per register level.
pub fn render_origin(data: &Value) -> String {
    let Some(Value::Object(origin)) = data.get("origin") else {
        return String::new();
    };
    let mut parts = Vec::new();
    for (dimension, registers) in origin {
        let Value::Object(registers) = registers else {
            continue;
        };
        for (register, info) in registers {
            let level = register
                .get(1..)
                .and_then(|digits| digits.parse::<usize>().ok())
                .unwrap_or(0);
            let domain = info.get("domain").map(scalar).unwrap_or_default();
            let value = info.get("value").map(scalar).unwrap_or_default();
            parts.push(format!("{}{dimension}={domain}.{value}", ":".repeat(level)));
        }
    }
    parts.join(" ")
}

fn scalar(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
