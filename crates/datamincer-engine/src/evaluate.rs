use indexmap::IndexMap;
use serde_json::{Map, Value};

use datamincer_core::union;

use crate::errors::EngineResult;
use crate::plugin::EvalContext;
use crate::tree::Node;

/// Include/exclude prefixes restricting which leaf paths get evaluated.
#[derive(Debug, Clone, Default)]
pub struct PathFilter {
    pub include: Vec<Vec<String>>,
    pub exclude: Vec<Vec<String>>,
}

impl PathFilter {
    pub fn including(paths: &[&[&str]]) -> Self {
        Self {
            include: to_owned_paths(paths),
            exclude: Vec::new(),
        }
    }

    pub fn excluding(paths: &[&[&str]]) -> Self {
        Self {
            include: Vec::new(),
            exclude: to_owned_paths(paths),
        }
    }

    fn accepts(&self, path: &[String]) -> bool {
        let included = self.include.is_empty()
            || self.include.iter().any(|prefix| is_prefix(prefix, path));
        included && !self.exclude.iter().any(|prefix| is_prefix(prefix, path))
    }
}

fn to_owned_paths(paths: &[&[&str]]) -> Vec<Vec<String>> {
    paths
        .iter()
        .map(|path| path.iter().map(|part| part.to_string()).collect())
        .collect()
}

/// Whether `path` starts with `prefix`; a longer prefix matches a path that ends
/// on a plugin or empty mapping along it.
fn is_prefix(prefix: &[String], path: &[String]) -> bool {
    prefix
        .iter()
        .zip(path.iter())
        .all(|(expected, actual)| expected == actual)
}

/// Every path from the config root to a leaf: a plain value, a plugin, or an
/// empty mapping.
pub fn leaf_paths(config: &IndexMap<String, Node>) -> Vec<Vec<String>> {
    let mut paths = Vec::new();
    collect_paths(config, &mut Vec::new(), &mut paths);
    paths
}

fn collect_paths(
    config: &IndexMap<String, Node>,
    prefix: &mut Vec<String>,
    paths: &mut Vec<Vec<String>>,
) {
    for (key, node) in config {
        prefix.push(key.clone());
        match node {
            Node::Map(children) if !children.is_empty() => collect_paths(children, prefix, paths),
            _ => paths.push(prefix.clone()),
        }
        prefix.pop();
    }
}

/// Evaluates the config leaves of the instance behind `ctx`.
///
/// Plugins met at a leaf are evaluated against the results computed so far
/// merged over `data`, so later keys may refer to earlier siblings.
pub fn evaluate_children(
    ctx: &EvalContext<'_>,
    data: &Value,
    filter: &PathFilter,
) -> EngineResult<Value> {
    let config = &ctx.core().config;
    let mut result = Map::new();
    for path in leaf_paths(config) {
        if !filter.accepts(&path) {
            continue;
        }
        let Some(node) = node_at(config, &path) else {
            continue;
        };
        let value = match node {
            Node::Plugin(id) => {
                let ambient = union(&Value::Object(result.clone()), data);
                ctx.at(*id).evaluate(&ambient)?
            }
            Node::Leaf(value) => value.clone(),
            Node::Map(_) => Value::Object(Map::new()),
        };
        insert_at(&mut result, &path, value);
    }
    Ok(Value::Object(result))
}

fn node_at<'a>(config: &'a IndexMap<String, Node>, path: &[String]) -> Option<&'a Node> {
    let (first, rest) = path.split_first()?;
    let node = config.get(first)?;
    if rest.is_empty() {
        return Some(node);
    }
    node_at(node.as_map()?, rest)
}

fn insert_at(target: &mut Map<String, Value>, path: &[String], value: Value) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };
    let mut current = target;
    for key in parents {
        let entry = current
            .entry(key.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        let Value::Object(next) = entry else {
            return;
        };
        current = next;
    }
    current.insert(last.clone(), value);
}
