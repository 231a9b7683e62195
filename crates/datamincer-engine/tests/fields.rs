use std::cell::Cell;
use std::path::PathBuf;
use std::rc::Rc;

use datamincer_core::SchemaChildren;
use datamincer_engine::plugins::fields::field_children;
use datamincer_engine::{
    BundleInfo, Engine, EngineError, EngineOptions, EngineResult, EvalContext, Field,
    InstanceCore, Plugin, PluginDescriptor, PluginRegistry, Product,
};
use serde_json::{Value, json};

fn temp_dir(label: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("datamincer_{label}_{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

fn options(root: &PathBuf) -> EngineOptions {
    EngineOptions {
        bundle_path: root.clone(),
        build_path: root.join("build"),
        temp_path: root.join("tmp"),
        cache_path: root.join("cache"),
        state_path: root.join("state"),
        ..EngineOptions::default()
    }
}

fn init(engine: &Engine, yaml: &str) -> EngineResult<Product> {
    let config: Value = serde_yaml::from_str(yaml).expect("parse yaml");
    let bundle = BundleInfo {
        name: "fields".to_string(),
        path: engine.options().bundle_path.clone(),
    };
    engine.init_unit(&config, &bundle, &json!({}))
}

fn records(output: &Value) -> Vec<Value> {
    output["main"]["rec"].as_array().expect("records").clone()
}

/// Field returning how many times it was computed.
struct CountingDescriptor {
    calls: Rc<Cell<u32>>,
}

impl PluginDescriptor for CountingDescriptor {
    fn plugin_type(&self) -> &str {
        "field"
    }

    fn plugin_id(&self) -> &str {
        "counting"
    }

    fn schema_children(&self) -> SchemaChildren {
        field_children(&[])
    }

    fn create(&self, _core: &InstanceCore) -> EngineResult<Box<dyn Plugin>> {
        Ok(Box::new(Counting {
            calls: Rc::clone(&self.calls),
        }))
    }
}

struct Counting {
    calls: Rc<Cell<u32>>,
}

impl Plugin for Counting {
    fn as_field(&self) -> Option<&dyn Field> {
        Some(self)
    }
}

impl Field for Counting {
    fn get_value(&self, _ctx: &EvalContext<'_>, _data: &Value) -> EngineResult<Value> {
        self.calls.set(self.calls.get() + 1);
        Ok(json!(self.calls.get()))
    }
}

const PERSISTENT: &str = r#"
generators:
  main:
    workers:
      rows: {worker: range, count: 3}
      rec:
        worker: record
        var: ~
        fields:
          stamp:
            field: counting
            persistent: fixed-key
          fresh:
            field: counting
"#;

#[test]
fn persistent_fields_compute_once_per_key() {
    let root = temp_dir("persistent");
    let calls = Rc::new(Cell::new(0));
    let mut registry = PluginRegistry::with_builtins();
    registry.register(Box::new(CountingDescriptor {
        calls: Rc::clone(&calls),
    }));
    let engine = Engine::new(registry, options(&root));

    let product = init(&engine, PERSISTENT).expect("init unit");
    let rows = records(&product.run_task("generate", &[]).expect("generate"));
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0]["stamp"], json!(1));
    assert!(rows.iter().all(|row| row["stamp"] == json!(1)));
    assert_eq!(rows[2]["fresh"], json!(4));
    assert_eq!(calls.get(), 4);

    // A new product over the same state reuses the stored value.
    let product = init(&engine, PERSISTENT).expect("init unit again");
    let rows = records(&product.run_task("generate", &[]).expect("generate again"));
    assert!(rows.iter().all(|row| row["stamp"] == json!(1)));
    assert_eq!(calls.get(), 7);
}

const SEQUENCE: &str = r#"
services:
  ids: {service: counter, start: 10}
generators:
  main:
    workers:
      rows: {worker: range, count: 3}
      rec:
        worker: record
        var: ~
        fields:
          id: {field: "sequence(ids)"}
          digest: {field: hash, input: abc}
          copy: "@id"
"#;

#[test]
fn sequences_continue_across_runs() {
    let root = temp_dir("sequence");
    let engine = Engine::new(PluginRegistry::with_builtins(), options(&root));

    let product = init(&engine, SEQUENCE).expect("init unit");
    let rows = records(&product.run_task("generate", &[]).expect("generate"));
    let ids: Vec<&Value> = rows.iter().map(|row| &row["id"]).collect();
    assert_eq!(ids, [&json!(10), &json!(11), &json!(12)]);
    assert_eq!(rows[0]["copy"], json!(10));
    assert_eq!(
        rows[0]["digest"],
        json!("a9993e364706816aba3e25717850c26c9cd0d89d")
    );

    let product = init(&engine, SEQUENCE).expect("init unit again");
    let rows = records(&product.run_task("generate", &[]).expect("generate again"));
    assert_eq!(rows[0]["id"], json!(13));
}

#[test]
fn missing_dependency_arguments_are_reported() {
    let engine = Engine::new(PluginRegistry::with_builtins(), options(&temp_dir("deps")));
    let err = init(
        &engine,
        r#"
generators:
  main:
    workers:
      rec:
        worker: record
        fields:
          id: {field: sequence}
"#,
    )
    .err()
    .expect("missing argument");
    let EngineError::Dependency(failure) = &err else {
        panic!("unexpected error: {err}");
    };
    assert_eq!(failure.plugin_id, "sequence");
    assert!(failure.message.contains("1 dependency(s)"), "{}", failure.message);
    assert!(failure.path.ends_with("fields/id"), "{}", failure.path);
}

#[test]
fn unknown_dependencies_are_reported() {
    let engine = Engine::new(PluginRegistry::with_builtins(), options(&temp_dir("deps")));
    let err = init(
        &engine,
        r#"
generators:
  main:
    workers:
      rec:
        worker: record
        fields:
          id: {field: "sequence(nope)"}
"#,
    )
    .err()
    .expect("unknown argument");
    let message = err.to_string();
    assert!(
        message.contains("Couldn't resolve required dependency(s): service(counter)"),
        "{message}"
    );
    assert!(message.starts_with("dependency error: Field plugin 'sequence' error"), "{message}");
}
