use datamincer_core::{JsonSchemaValidator, PartialTable, SchemaNode, SchemaValidator};
use serde_json::json;

const DOCUMENT: &str = r#"
_type: array
_children:
  title:
    _type: text
  workers:
    _type: prototype
    _min_items: 1
    _prototype:
      _type: partial
      _partial: worker
"#;

const PARTIALS: &str = r#"
worker:
  _type: array
  _children:
    worker:
      _type: text
    size:
      _type: number
      _required: false
"#;

fn load() -> (SchemaNode, PartialTable) {
    let schema: SchemaNode = serde_yaml::from_str(DOCUMENT).expect("parse schema");
    let partials: PartialTable = serde_yaml::from_str(PARTIALS).expect("parse partials");
    (schema, partials)
}

#[test]
fn yaml_documents_validate_configuration() {
    let (schema, partials) = load();
    let validator = JsonSchemaValidator;

    let valid = json!({"title": "demo", "workers": {"w": {"worker": "window", "size": 2}}});
    let issues = validator.validate(&valid, &schema, &partials).expect("validate");
    assert!(issues.is_empty(), "{issues:?}");

    let unset_optional = json!({"title": "demo", "workers": {"w": {"worker": "each", "size": null}}});
    let issues = validator
        .validate(&unset_optional, &schema, &partials)
        .expect("validate");
    assert!(issues.is_empty(), "{issues:?}");

    let invalid = json!({"title": "demo", "workers": {"w": {"size": "big"}}});
    let issues = validator.validate(&invalid, &schema, &partials).expect("validate");
    assert!(!issues.is_empty());
    assert!(issues.iter().all(|issue| issue.path.starts_with("/workers/w")), "{issues:?}");
}

#[test]
fn serializes_schema_deterministically() {
    let node = SchemaNode::prototype(SchemaNode::partial("worker"))
        .min_items(1)
        .optional();
    let json = serde_json::to_string(&node).expect("serialize schema");
    assert_eq!(
        json,
        r#"{"_type":"prototype","_required":false,"_min_items":1,"_prototype":{"_type":"partial","_required":true,"_partial":"worker"}}"#
    );
}
