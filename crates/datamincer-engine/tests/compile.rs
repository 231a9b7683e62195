use datamincer_core::{PartialTable, SchemaChildren, SchemaNode};
use datamincer_engine::plugins::fields::field_children;
use datamincer_engine::{
    BundleInfo, Compiler, Diagnostics, Engine, EngineError, EngineOptions, EngineResult,
    EvalContext, Field, InstanceCore, Plugin, PluginDescriptor, PluginRegistry,
};
use serde_json::{Value, json};

fn yaml(source: &str) -> Value {
    serde_yaml::from_str(source).expect("parse yaml")
}

fn engine(novalidate: bool) -> Engine {
    engine_with(PluginRegistry::with_builtins(), novalidate)
}

fn engine_with(registry: PluginRegistry, novalidate: bool) -> Engine {
    let root = std::env::temp_dir().join(format!("datamincer_compile_{}", uuid::Uuid::new_v4()));
    let options = EngineOptions {
        bundle_path: root.clone(),
        build_path: root.join("build"),
        temp_path: root.join("tmp"),
        cache_path: root.join("cache"),
        state_path: root.join("state"),
        novalidate,
        ..EngineOptions::default()
    };
    Engine::new(registry, options)
}

/// Field whose value is the mixin its descriptor contributes.
struct LabelDescriptor;

impl PluginDescriptor for LabelDescriptor {
    fn plugin_type(&self) -> &str {
        "field"
    }

    fn plugin_id(&self) -> &str {
        "label"
    }

    fn schema_children(&self) -> SchemaChildren {
        field_children(&[])
    }

    fn mixin_schema(&self) -> Option<SchemaNode> {
        let mut children = SchemaChildren::new();
        children.insert("prefix".to_string(), SchemaNode::text());
        children.insert(
            "columns".to_string(),
            SchemaNode::prototype(SchemaNode::partial("field")),
        );
        Some(SchemaNode::array(children))
    }

    fn mixin(&self) -> Value {
        json!({"prefix": "id-", "columns": {"code": "x"}})
    }

    fn create(&self, _core: &InstanceCore) -> EngineResult<Box<dyn Plugin>> {
        Ok(Box::new(Label))
    }
}

struct Label;

impl Plugin for Label {
    fn as_field(&self) -> Option<&dyn Field> {
        Some(self)
    }
}

impl Field for Label {
    fn get_value(&self, ctx: &EvalContext<'_>, data: &Value) -> EngineResult<Value> {
        ctx.resolve(ctx.core().mixin()?, data)
    }
}

#[test]
fn defaults_are_merged_under_user_config() {
    let compiled = engine(false)
        .compile(&yaml(
            r#"
generators:
  main:
    workers:
      batches: {worker: window, var: batch}
"#,
        ))
        .expect("compile");

    let config = &compiled.config;
    assert_eq!(config["unit"], json!("deck"));
    assert_eq!(config["_pluginType"], json!("unit"));

    let generator = &config["generators"]["main"];
    assert_eq!(generator["generator"], json!("default"));

    let worker = &generator["workers"]["batches"];
    assert_eq!(worker["worker"], json!("window"));
    assert_eq!(worker["size"], json!(10));
    assert_eq!(worker["var"], json!("batch"));
    assert_eq!(worker["merge"], json!("dest"));
    assert_eq!(worker["_pluginArgs"], json!([]));
    assert!(compiled.partials.contains_key("field"));
}

#[test]
fn scalar_fields_compile_to_value_plugins() {
    let compiled = engine(false)
        .compile(&yaml(
            r#"
generators:
  main:
    workers:
      rec:
        worker: record
        fields:
          name: alice
          empty: ~
          id: {field: "sequence(ids, other)"}
"#,
        ))
        .expect("compile");

    let fields = &compiled.config["generators"]["main"]["workers"]["rec"]["fields"];
    assert_eq!(fields["name"]["field"], json!("value"));
    assert_eq!(fields["name"]["value"], json!("alice"));
    assert_eq!(fields["empty"]["value"], json!(""));
    assert_eq!(fields["id"]["field"], json!("sequence"));
    assert_eq!(fields["id"]["_pluginArgs"], json!(["ids", "other"]));
}

#[test]
fn unknown_partials_are_named() {
    let registry = PluginRegistry::with_builtins();
    let err = Compiler::new(&registry, Diagnostics::default())
        .compile(&json!({}), &SchemaNode::partial("widget"), &PartialTable::new())
        .expect_err("missing partial");
    assert!(err.to_string().contains("Partial \"widget\" not found"), "{err}");
}

#[test]
fn unknown_plugins_are_rejected() {
    let err = engine(false)
        .compile(&yaml("generators: {main: {workers: {w: {worker: nope}}}}"))
        .expect_err("unknown worker");
    assert!(matches!(err, EngineError::Configuration(_)));
    assert!(err.to_string().contains("worker plugin \"nope\" not found"), "{err}");
}

#[test]
fn plugin_configs_must_not_be_sequences() {
    let err = engine(false)
        .compile(&yaml("generators: {main: {workers: {w: [1, 2]}}}"))
        .expect_err("sequence config");
    assert!(matches!(err, EngineError::Configuration(_)), "{err}");
    assert!(err.to_string().contains("worker config must be an assoc array"), "{err}");
}

#[test]
fn empty_and_scalar_configs_select_the_default_plugin() {
    let compiled = engine(false)
        .compile(&yaml(
            r#"
services: {clock: ~}
generators:
  main:
    workers:
      nums: {worker: range, count: 2, var: ~}
      out: ~
      label: shown
  idle: ~
"#,
        ))
        .expect("compile");

    let config = &compiled.config;
    let workers = &config["generators"]["main"]["workers"];
    assert_eq!(workers["out"]["worker"], json!("passthrough"));
    assert_eq!(workers["out"]["var"], json!("row"));
    assert_eq!(workers["label"]["worker"], json!("passthrough"));
    assert_eq!(config["generators"]["idle"]["generator"], json!("default"));
    assert_eq!(config["services"]["clock"]["service"], json!("counter"));
}

#[test]
fn sequences_of_plugins_are_keyed_by_index() {
    let compiled = engine(false)
        .compile(&yaml(
            r#"
generators:
  main:
    workers:
      - {worker: range, count: 2, var: ~}
      - {worker: window, size: 2}
"#,
        ))
        .expect("compile");

    let workers = &compiled.config["generators"]["main"]["workers"];
    assert_eq!(workers["0"]["worker"], json!("range"));
    assert_eq!(workers["1"]["worker"], json!("window"));
    assert_eq!(workers["1"]["_pluginArgs"], json!([]));
}

#[test]
fn invalid_configs_fail_validation_unless_disabled() {
    let config = yaml("generators: {main: {workers: {w: {worker: range, count: 1, start: soon}}}}");
    let bundle = BundleInfo {
        name: "compile".to_string(),
        path: std::env::temp_dir(),
    };

    let err = engine(false)
        .init_unit(&config, &bundle, &json!({}))
        .err()
        .expect("validation error");
    assert!(err.to_string().contains("Config validation error"), "{err}");

    assert!(engine(true).init_unit(&config, &bundle, &json!({})).is_ok());
}

#[test]
fn debug_mode_attaches_fragments() {
    let registry = PluginRegistry::with_builtins();
    let err = Compiler::new(&registry, Diagnostics::new(true))
        .compile(&json!({"a": 1}), &SchemaNode::partial("widget"), &PartialTable::new())
        .expect_err("missing partial");
    let EngineError::Configuration(details) = &err else {
        panic!("unexpected error: {err}");
    };
    assert!(details.details.as_deref().is_some_and(|text| text.contains("a: 1")));
}

const LABELLED: &str = r#"
generators:
  main:
    workers:
      rows: {worker: range, count: 1}
      rec:
        worker: record
        var: ~
        fields:
          tag: {field: label, _mixin: ignored}
          name: plain
"#;

#[test]
fn mixins_are_compiled_into_plugin_configs() {
    let mut registry = PluginRegistry::with_builtins();
    registry.register(Box::new(LabelDescriptor));
    let engine = engine_with(registry, false);

    let compiled = engine.compile(&yaml(LABELLED)).expect("compile");
    let fields = &compiled.config["generators"]["main"]["workers"]["rec"]["fields"];
    assert_eq!(fields["tag"]["_mixin"]["prefix"], json!("id-"));
    assert_eq!(fields["tag"]["_mixin"]["columns"]["code"]["field"], json!("value"));
    assert!(fields["name"].get("_mixin").is_none());

    let bundle = BundleInfo {
        name: "mixin".to_string(),
        path: engine.options().bundle_path.clone(),
    };
    let product = engine
        .init_unit(&yaml(LABELLED), &bundle, &json!({}))
        .expect("init unit");
    let output = product.run_task("generate", &[]).expect("generate");
    assert_eq!(
        output["main"]["rec"][0]["tag"],
        json!({"prefix": "id-", "columns": {"code": "x"}})
    );

    let tree = product.tree();
    let plain = tree.find("field", "name").expect("plain field");
    let err = tree.instance(plain).core.mixin().expect_err("no mixin");
    assert!(err.to_string().contains("Plugin mixin doesn't exist"), "{err}");
}
