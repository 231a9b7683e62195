use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Named child nodes of an array schema, in declaration order.
pub type SchemaChildren = IndexMap<String, SchemaNode>;

/// Named reusable schema fragments referenced by `_partial`.
pub type PartialTable = IndexMap<String, SchemaNode>;

fn required_default() -> bool {
    true
}

/// A node of the configuration schema.
///
/// The serialized form mirrors the schema description format: every node is a
/// mapping tagged by `_type` with underscore-prefixed attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "_type", rename_all = "snake_case")]
pub enum SchemaNode {
    /// Fixed set of named children.
    Array {
        #[serde(rename = "_required", default = "required_default")]
        required: bool,
        #[serde(rename = "_children", default)]
        children: SchemaChildren,
    },
    /// Open mapping where every value follows the same element schema.
    Prototype {
        #[serde(rename = "_required", default = "required_default")]
        required: bool,
        #[serde(
            rename = "_min_items",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        min_items: Option<usize>,
        #[serde(rename = "_prototype")]
        prototype: Box<SchemaNode>,
    },
    /// Value must satisfy one of the named variants.
    Choice {
        #[serde(rename = "_required", default = "required_default")]
        required: bool,
        #[serde(rename = "_choices")]
        choices: IndexMap<String, SchemaNode>,
    },
    /// Reference into the active partial table.
    Partial {
        #[serde(rename = "_required", default = "required_default")]
        required: bool,
        #[serde(rename = "_partial")]
        partial: String,
    },
    Text {
        #[serde(rename = "_required", default = "required_default")]
        required: bool,
    },
    Number {
        #[serde(rename = "_required", default = "required_default")]
        required: bool,
    },
    Boolean {
        #[serde(rename = "_required", default = "required_default")]
        required: bool,
    },
    Enum {
        #[serde(rename = "_required", default = "required_default")]
        required: bool,
        #[serde(rename = "_values")]
        values: Vec<Value>,
    },
    Any {
        #[serde(rename = "_required", default = "required_default")]
        required: bool,
    },
}

impl SchemaNode {
    pub fn array(children: SchemaChildren) -> Self {
        Self::Array {
            required: true,
            children,
        }
    }

    pub fn prototype(prototype: SchemaNode) -> Self {
        Self::Prototype {
            required: true,
            min_items: None,
            prototype: Box::new(prototype),
        }
    }

    pub fn choice(choices: IndexMap<String, SchemaNode>) -> Self {
        Self::Choice {
            required: true,
            choices,
        }
    }

    pub fn partial(name: impl Into<String>) -> Self {
        Self::Partial {
            required: true,
            partial: name.into(),
        }
    }

    pub fn text() -> Self {
        Self::Text { required: true }
    }

    pub fn number() -> Self {
        Self::Number { required: true }
    }

    pub fn boolean() -> Self {
        Self::Boolean { required: true }
    }

    pub fn any() -> Self {
        Self::Any { required: true }
    }

    pub fn one_of(values: Vec<Value>) -> Self {
        Self::Enum {
            required: true,
            values,
        }
    }

    /// Marks the node as optional.
    pub fn optional(mut self) -> Self {
        self.set_required(false);
        self
    }

    /// Sets the minimum number of entries for a prototype node.
    pub fn min_items(mut self, count: usize) -> Self {
        if let Self::Prototype { min_items, .. } = &mut self {
            *min_items = Some(count);
        }
        self
    }

    pub fn is_required(&self) -> bool {
        match self {
            Self::Array { required, .. }
            | Self::Prototype { required, .. }
            | Self::Choice { required, .. }
            | Self::Partial { required, .. }
            | Self::Text { required }
            | Self::Number { required }
            | Self::Boolean { required }
            | Self::Enum { required, .. }
            | Self::Any { required } => *required,
        }
    }

    pub fn set_required(&mut self, value: bool) {
        match self {
            Self::Array { required, .. }
            | Self::Prototype { required, .. }
            | Self::Choice { required, .. }
            | Self::Partial { required, .. }
            | Self::Text { required }
            | Self::Number { required }
            | Self::Boolean { required }
            | Self::Enum { required, .. }
            | Self::Any { required } => *required = value,
        }
    }

    /// Tag name of the node as written in schema documents.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Array { .. } => "array",
            Self::Prototype { .. } => "prototype",
            Self::Choice { .. } => "choice",
            Self::Partial { .. } => "partial",
            Self::Text { .. } => "text",
            Self::Number { .. } => "number",
            Self::Boolean { .. } => "boolean",
            Self::Enum { .. } => "enum",
            Self::Any { .. } => "any",
        }
    }

    /// Partial describing a plugin of `plugin_type` written as a mapping carrying
    /// the plugin selector under the type key. With `scalar` set, the partial
    /// also validates a plain value left uncompiled.
    pub fn plugin_partial(plugin_type: &str, scalar: bool) -> Self {
        let mut one = SchemaChildren::new();
        one.insert(plugin_type.to_string(), Self::text());
        let mut choices = IndexMap::new();
        if scalar {
            choices.insert("default".to_string(), Self::any());
        }
        choices.insert("one".to_string(), Self::array(one));
        Self::choice(choices)
    }

    /// Whether the node describes a plain value.
    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            Self::Text { .. }
                | Self::Number { .. }
                | Self::Boolean { .. }
                | Self::Enum { .. }
                | Self::Any { .. }
        )
    }

    /// Array node a partial expands into: the `one` choice of a plugin partial, or
    /// the partial itself when it already is an array.
    pub fn plugin_shape(&self) -> Option<&SchemaNode> {
        match self {
            Self::Choice { choices, .. } => choices
                .get("one")
                .filter(|node| matches!(node, Self::Array { .. })),
            Self::Array { .. } => Some(self),
            _ => None,
        }
    }
}

/// Adds entries from `extra` whose names are not yet present in `target`.
pub fn extend_missing(target: &mut IndexMap<String, SchemaNode>, extra: IndexMap<String, SchemaNode>) {
    for (name, node) in extra {
        target.entry(name).or_insert(node);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_schema_documents() {
        let yaml = r#"
_type: array
_children:
  generators:
    _type: prototype
    _required: false
    _min_items: 1
    _prototype:
      _type: partial
      _partial: generator
  mode:
    _type: enum
    _values: [fast, slow]
"#;
        let node: SchemaNode = serde_yaml::from_str(yaml).expect("parse schema");
        let SchemaNode::Array { children, required } = &node else {
            panic!("expected array node");
        };
        assert!(*required);
        assert_eq!(children["generators"].kind(), "prototype");
        assert!(!children["generators"].is_required());
        assert_eq!(children["mode"], SchemaNode::one_of(vec!["fast".into(), "slow".into()]));
    }

    #[test]
    fn plugin_shape_prefers_one_choice() {
        let partial = SchemaNode::plugin_partial("worker", false);
        let shape = partial.plugin_shape().expect("plugin shape");
        let SchemaNode::Array { children, .. } = shape else {
            panic!("expected array");
        };
        assert!(children.contains_key("worker"));
        assert!(SchemaNode::text().plugin_shape().is_none());
        assert!(!partial.is_scalar());
        assert!(SchemaNode::one_of(vec!["a".into()]).is_scalar());
    }

    #[test]
    fn extend_missing_keeps_first_contribution() {
        let mut table = PartialTable::new();
        table.insert("field".to_string(), SchemaNode::text());
        let mut extra = PartialTable::new();
        extra.insert("field".to_string(), SchemaNode::number());
        extra.insert("worker".to_string(), SchemaNode::any());
        extend_missing(&mut table, extra);
        assert_eq!(table["field"], SchemaNode::text());
        assert_eq!(table.get_index(1).map(|(name, _)| name.as_str()), Some("worker"));
    }
}
