use serde_json::{Map, Value, json};
use sha1::{Digest, Sha1};

use datamincer_core::{SchemaChildren, SchemaNode};

use crate::errors::EngineResult;
use crate::field::PERSISTENT_KEY;
use crate::plugin::{EvalContext, Field, Plugin};
use crate::registry::{DependencySlot, PluginDescriptor, plugin_config};
use crate::tree::InstanceCore;

const FIELD_TYPE: &str = "field";
const COUNTER_SERVICE: &str = "counter";

/// Schema children every field accepts, followed by `extra`.
pub fn field_children(extra: &[(&str, SchemaNode)]) -> SchemaChildren {
    let mut children = SchemaChildren::new();
    children.insert(FIELD_TYPE.to_string(), SchemaNode::text());
    children.insert(
        PERSISTENT_KEY.to_string(),
        SchemaNode::partial(FIELD_TYPE).optional(),
    );
    for (name, node) in extra {
        children.insert(name.to_string(), node.clone());
    }
    children
}

fn text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// A field yielding its `value` with references resolved. Scalar field configs
/// compile to this plugin.
pub struct ValueDescriptor;

impl PluginDescriptor for ValueDescriptor {
    fn plugin_type(&self) -> &str {
        FIELD_TYPE
    }

    fn plugin_id(&self) -> &str {
        "value"
    }

    fn is_default(&self) -> bool {
        true
    }

    fn default_config(&self, arg: Option<&Value>) -> Map<String, Value> {
        let mut config = plugin_config(FIELD_TYPE, self.plugin_id());
        if let Some(arg) = arg {
            config.insert("value".to_string(), arg.clone());
        }
        config
    }

    fn schema_children(&self) -> SchemaChildren {
        field_children(&[("value", SchemaNode::any().optional())])
    }

    fn create(&self, _core: &InstanceCore) -> EngineResult<Box<dyn Plugin>> {
        Ok(Box::new(ValueField))
    }
}

pub struct ValueField;

impl Plugin for ValueField {
    fn as_field(&self) -> Option<&dyn Field> {
        Some(self)
    }
}

impl Field for ValueField {
    fn get_value(&self, ctx: &EvalContext<'_>, data: &Value) -> EngineResult<Value> {
        Ok(ctx.resolve_key("value", data)?.unwrap_or(Value::Null))
    }
}

/// Joins its resolved `items` with `separator`.
pub struct ConcatDescriptor;

impl PluginDescriptor for ConcatDescriptor {
    fn plugin_type(&self) -> &str {
        FIELD_TYPE
    }

    fn plugin_id(&self) -> &str {
        "concat"
    }

    fn default_config(&self, _arg: Option<&Value>) -> Map<String, Value> {
        let mut config = plugin_config(FIELD_TYPE, self.plugin_id());
        config.insert("separator".to_string(), json!(""));
        config
    }

    fn schema_children(&self) -> SchemaChildren {
        field_children(&[
            ("items", SchemaNode::any()),
            ("separator", SchemaNode::text().optional()),
        ])
    }

    fn create(&self, _core: &InstanceCore) -> EngineResult<Box<dyn Plugin>> {
        Ok(Box::new(ConcatField))
    }
}

pub struct ConcatField;

impl Plugin for ConcatField {
    fn as_field(&self) -> Option<&dyn Field> {
        Some(self)
    }
}

impl Field for ConcatField {
    fn get_value(&self, ctx: &EvalContext<'_>, data: &Value) -> EngineResult<Value> {
        let separator = ctx
            .resolve_key("separator", data)?
            .map(|value| text(&value))
            .unwrap_or_default();
        let parts: Vec<String> = match ctx.resolve_key("items", data)? {
            Some(Value::Array(items)) => items.iter().map(text).collect(),
            Some(Value::Object(map)) => map.values().map(text).collect(),
            Some(other) => vec![text(&other)],
            None => Vec::new(),
        };
        Ok(Value::String(parts.join(&separator)))
    }
}

/// SHA-1 hex digest of its resolved `input`; non-text input is hashed as JSON.
pub struct HashDescriptor;

impl PluginDescriptor for HashDescriptor {
    fn plugin_type(&self) -> &str {
        FIELD_TYPE
    }

    fn plugin_id(&self) -> &str {
        "hash"
    }

    fn schema_children(&self) -> SchemaChildren {
        field_children(&[("input", SchemaNode::any())])
    }

    fn create(&self, _core: &InstanceCore) -> EngineResult<Box<dyn Plugin>> {
        Ok(Box::new(HashField))
    }
}

pub struct HashField;

impl Plugin for HashField {
    fn as_field(&self) -> Option<&dyn Field> {
        Some(self)
    }
}

impl Field for HashField {
    fn get_value(&self, ctx: &EvalContext<'_>, data: &Value) -> EngineResult<Value> {
        let input = match ctx.resolve_key("input", data)? {
            Some(Value::String(text)) => text,
            Some(other) => serde_json::to_string(&other)?,
            None => String::new(),
        };
        Ok(Value::String(hex::encode(Sha1::digest(input.as_bytes()))))
    }
}

/// Next number of a counter service, one sequence per field name.
pub struct SequenceDescriptor;

impl PluginDescriptor for SequenceDescriptor {
    fn plugin_type(&self) -> &str {
        FIELD_TYPE
    }

    fn plugin_id(&self) -> &str {
        "sequence"
    }

    fn dependencies(&self) -> Vec<DependencySlot> {
        vec![DependencySlot::new("service", COUNTER_SERVICE)]
    }

    fn schema_children(&self) -> SchemaChildren {
        field_children(&[])
    }

    fn create(&self, _core: &InstanceCore) -> EngineResult<Box<dyn Plugin>> {
        Ok(Box::new(SequenceField))
    }
}

pub struct SequenceField;

impl Plugin for SequenceField {
    fn as_field(&self) -> Option<&dyn Field> {
        Some(self)
    }
}

impl Field for SequenceField {
    fn get_value(&self, ctx: &EvalContext<'_>, _data: &Value) -> EngineResult<Value> {
        let counter = ctx
            .default_dependency("service")
            .ok_or_else(|| ctx.error("counter service is not wired"))?;
        counter
            .service()?
            .request(&counter, "next", &json!({"scope": ctx.core().name}))
    }
}
