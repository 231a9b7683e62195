use serde_json::{Map, Value};
use tracing::debug;

use datamincer_core::{reference_chunks, strip_up_levels};

use crate::errors::EngineResult;
use crate::plugin::{EvalContext, Field};
use crate::tree::Node;

/// Config key naming the field that computes a persistence key.
pub const PERSISTENT_KEY: &str = "persistent";

/// Prefix marking a parameter as a reference into the evaluation data.
pub const REFERENCE_PREFIX: char = '@';

/// Value of `field` for `data`, served from state when the field is persistent
/// and a value was stored before.
pub fn field_value(ctx: &EvalContext<'_>, field: &dyn Field, data: &Value) -> EngineResult<Value> {
    let Some(Node::Plugin(persistent)) = ctx.core().get(PERSISTENT_KEY) else {
        return field.get_value(ctx, data);
    };
    let key = state_key(&ctx.at(*persistent).evaluate(data)?);
    let name = &ctx.core().name;

    let stored = ctx.state().borrow().get(&key, name).cloned();
    if let Some(value) = stored.filter(|value| !value.is_null()) {
        debug!(field = %name, key = %key, "persistent value reused");
        return Ok(value);
    }

    let value = field.get_value(ctx, data)?;
    ctx.state().borrow_mut().set(&key, name, value.clone())?;
    Ok(value)
}

fn state_key(key: &Value) -> String {
    match key {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Resolves a config node: plugins are evaluated, leaves resolved as params.
pub fn resolve_node(ctx: &EvalContext<'_>, data: &Value, node: &Node) -> EngineResult<Value> {
    match node {
        Node::Leaf(value) => resolve_params(ctx, data, value),
        Node::Plugin(id) => ctx.at(*id).evaluate(data),
        Node::Map(map) => {
            let mut resolved = Map::new();
            for (key, child) in map {
                resolved.insert(key.clone(), resolve_node(ctx, data, child)?);
            }
            Ok(Value::Object(resolved))
        }
    }
}

/// Resolves `@` references anywhere inside `params`.
pub fn resolve_params(ctx: &EvalContext<'_>, data: &Value, params: &Value) -> EngineResult<Value> {
    match params {
        Value::String(text) => match text.strip_prefix(REFERENCE_PREFIX) {
            Some(expr) => resolve_reference(ctx, data, text, expr),
            None => Ok(params.clone()),
        },
        Value::Array(items) => items
            .iter()
            .map(|item| resolve_params(ctx, data, item))
            .collect::<EngineResult<Vec<_>>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut resolved = Map::new();
            for (key, item) in map {
                resolved.insert(key.clone(), resolve_params(ctx, data, item)?);
            }
            Ok(Value::Object(resolved))
        }
        other => Ok(other.clone()),
    }
}

fn resolve_reference(
    ctx: &EvalContext<'_>,
    data: &Value,
    param: &str,
    expr: &str,
) -> EngineResult<Value> {
    let chunks = reference_chunks(expr)
        .map_err(|err| ctx.error(format!("Cannot resolve param '{param}': {err}")))?;
    let mut current = data;
    for chunk in &chunks {
        current = step(current, chunk).ok_or_else(|| {
            ctx.error(format!("Cannot resolve param '{param}': unknown index '{chunk}'"))
        })?;
    }
    Ok(current.clone())
}

/// One lookup step. Contexts already merge ancestor data, so an up-level prefix
/// that is not itself a key resolves against the same mapping once stripped.
fn step<'v>(current: &'v Value, chunk: &str) -> Option<&'v Value> {
    match current {
        Value::Object(map) => map.get(chunk).or_else(|| {
            let (levels, name) = strip_up_levels(chunk);
            (levels > 0).then(|| map.get(name)).flatten()
        }),
        Value::Array(items) => chunk.parse::<usize>().ok().and_then(|index| items.get(index)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn step_indexes_maps_and_sequences() {
        let data = json!({"rows": [{"id": 7}], "name": "x"});
        assert_eq!(step(&data, "name"), Some(&json!("x")));
        let rows = step(&data, "rows").expect("rows");
        assert_eq!(step(rows, "0"), Some(&json!({"id": 7})));
        assert_eq!(step(rows, "3"), None);
        assert_eq!(step(&data, "../../name"), Some(&json!("x")));
        assert_eq!(step(&json!(1), "a"), None);
    }

    #[test]
    fn state_keys_render_scalars() {
        assert_eq!(state_key(&json!("k")), "k");
        assert_eq!(state_key(&json!(3)), "3");
    }
}
