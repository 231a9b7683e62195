use jsonschema::JSONSchema;
use serde_json::{Map, Value, json};

use crate::error::{Error, Result};
use crate::schema::{PartialTable, SchemaNode};

const DEFINITIONS: &str = "definitions";

/// Single validation failure with its location in the validated document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let path = if self.path.is_empty() { "/" } else { &self.path };
        write!(f, "{path}: {}", self.message)
    }
}

/// Oracle deciding whether compiled configuration data satisfies a schema.
pub trait SchemaValidator {
    fn validate(
        &self,
        data: &Value,
        schema: &SchemaNode,
        partials: &PartialTable,
    ) -> Result<Vec<ValidationIssue>>;
}

/// Validator backed by a JSON Schema translation of the configuration schema.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSchemaValidator;

impl SchemaValidator for JsonSchemaValidator {
    fn validate(
        &self,
        data: &Value,
        schema: &SchemaNode,
        partials: &PartialTable,
    ) -> Result<Vec<ValidationIssue>> {
        let document = to_json_schema(schema, partials);
        let compiled =
            JSONSchema::compile(&document).map_err(|err| Error::InvalidSchema(err.to_string()))?;

        let mut issues = Vec::new();
        if let Err(errors) = compiled.validate(data) {
            for error in errors {
                issues.push(ValidationIssue {
                    path: error.instance_path.to_string(),
                    message: error.to_string(),
                });
            }
        }
        Ok(issues)
    }
}

/// Translates a schema tree plus its partial table into a JSON Schema document.
pub fn to_json_schema(schema: &SchemaNode, partials: &PartialTable) -> Value {
    let mut document = match convert(schema) {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("allOf".to_string(), json!([other]));
            map
        }
    };
    if !partials.is_empty() {
        let definitions: Map<String, Value> = partials
            .iter()
            .map(|(name, node)| (name.clone(), convert(node)))
            .collect();
        document.insert(DEFINITIONS.to_string(), Value::Object(definitions));
    }
    Value::Object(document)
}

fn convert(node: &SchemaNode) -> Value {
    let converted = match node {
        SchemaNode::Array { children, .. } => {
            let properties: Map<String, Value> = children
                .iter()
                .map(|(name, child)| (name.clone(), convert(child)))
                .collect();
            let required: Vec<&String> = children
                .iter()
                .filter(|(_, child)| child.is_required())
                .map(|(name, _)| name)
                .collect();
            let mut converted = json!({"type": "object", "properties": properties});
            if let (false, Value::Object(map)) = (required.is_empty(), &mut converted) {
                map.insert("required".to_string(), json!(required));
            }
            converted
        }
        SchemaNode::Prototype {
            prototype,
            min_items,
            ..
        } => {
            let element = convert(prototype);
            let mut converted = json!({
                "type": ["object", "array"],
                "additionalProperties": element,
                "items": element,
            });
            if let (Some(count), Value::Object(map)) = (min_items, &mut converted) {
                map.insert("minProperties".to_string(), json!(count));
                map.insert("minItems".to_string(), json!(count));
            }
            converted
        }
        SchemaNode::Choice { choices, .. } => {
            let variants: Vec<Value> = choices.values().map(convert).collect();
            json!({"anyOf": variants})
        }
        SchemaNode::Partial { partial, .. } => {
            json!({"$ref": format!("#/{DEFINITIONS}/{}", escape_pointer(partial))})
        }
        SchemaNode::Text { .. } => json!({"type": ["string", "number", "boolean"]}),
        SchemaNode::Number { .. } => json!({"type": "number"}),
        SchemaNode::Boolean { .. } => json!({"type": "boolean"}),
        SchemaNode::Enum { values, .. } => json!({"enum": values}),
        SchemaNode::Any { .. } => json!({}),
    };

    if node.is_required() || matches!(node, SchemaNode::Any { .. }) {
        converted
    } else {
        json!({"anyOf": [converted, {"type": "null"}]})
    }
}

fn escape_pointer(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}
