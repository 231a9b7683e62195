use serde_json::{Map, Value, json};
use tracing::debug;

use datamincer_core::{SchemaChildren, SchemaNode};

use crate::errors::EngineResult;
use crate::plugin::{EvalContext, Plugin, Service};
use crate::registry::{PluginDescriptor, plugin_config};
use crate::tree::InstanceCore;

/// Monotonic counters kept in product state, so numbering resumes across runs.
pub struct CounterDescriptor;

impl PluginDescriptor for CounterDescriptor {
    fn plugin_type(&self) -> &str {
        "service"
    }

    fn plugin_id(&self) -> &str {
        "counter"
    }

    fn is_default(&self) -> bool {
        true
    }

    fn default_config(&self, _arg: Option<&Value>) -> Map<String, Value> {
        let mut config = plugin_config(self.plugin_type(), self.plugin_id());
        config.insert("start".to_string(), json!(1));
        config.insert("step".to_string(), json!(1));
        config
    }

    fn schema_children(&self) -> SchemaChildren {
        let mut children = SchemaChildren::new();
        children.insert("service".to_string(), SchemaNode::text());
        children.insert("start".to_string(), SchemaNode::number().optional());
        children.insert("step".to_string(), SchemaNode::number().optional());
        children
    }

    fn create(&self, core: &InstanceCore) -> EngineResult<Box<dyn Plugin>> {
        Ok(Box::new(Counter {
            start: core.get_i64("start").unwrap_or(1),
            step: core.get_i64("step").unwrap_or(1),
        }))
    }
}

pub struct Counter {
    start: i64,
    step: i64,
}

impl Counter {
    fn collection(ctx: &EvalContext<'_>) -> String {
        format!("service.counter.{}", ctx.core().name)
    }

    fn next(&self, ctx: &EvalContext<'_>, scope: &str) -> EngineResult<Value> {
        let collection = Self::collection(ctx);
        let current = ctx
            .state()
            .borrow()
            .get(&collection, scope)
            .and_then(Value::as_i64)
            .unwrap_or(self.start);
        ctx.state()
            .borrow_mut()
            .set(&collection, scope, json!(current + self.step))?;
        debug!(counter = %ctx.core().name, scope, value = current, "counter advanced");
        Ok(json!(current))
    }
}

impl Plugin for Counter {
    fn as_service(&self) -> Option<&dyn Service> {
        Some(self)
    }
}

impl Service for Counter {
    fn request(&self, ctx: &EvalContext<'_>, operation: &str, args: &Value) -> EngineResult<Value> {
        let scope = args.get("scope").and_then(Value::as_str).unwrap_or("default");
        match operation {
            "next" => self.next(ctx, scope),
            "peek" => Ok(ctx
                .state()
                .borrow()
                .get(&Self::collection(ctx), scope)
                .cloned()
                .unwrap_or(json!(self.start))),
            other => Err(ctx.error(format!("unknown operation '{other}'"))),
        }
    }
}
