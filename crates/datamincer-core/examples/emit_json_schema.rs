use datamincer_core::{PartialTable, SchemaNode, to_json_schema};

/// Prints the JSON Schema of a schema document given as YAML, either a bare
/// node or `{schema, partials}`.
fn main() {
    let path = std::env::args().nth(1).expect("usage: emit_json_schema <schema.yml>");
    let content = std::fs::read_to_string(&path).expect("read schema document");
    let document: serde_yaml::Value = serde_yaml::from_str(&content).expect("parse yaml");

    let (schema, partials) = match document.get("schema") {
        Some(schema) => {
            let schema: SchemaNode = serde_yaml::from_value(schema.clone()).expect("parse schema");
            let partials: PartialTable = document
                .get("partials")
                .cloned()
                .map(|partials| serde_yaml::from_value(partials).expect("parse partials"))
                .unwrap_or_default();
            (schema, partials)
        }
        None => (
            serde_yaml::from_value(document).expect("parse schema"),
            PartialTable::new(),
        ),
    };

    let json = serde_json::to_string_pretty(&to_json_schema(&schema, &partials))
        .expect("serialize json schema");
    println!("{json}");
}
