use indexmap::IndexMap;
use tracing::debug;

use datamincer_core::QualifiedName;

use crate::errors::{EngineError, EngineResult};
use crate::registry::{DependencySlot, PluginRegistry};
use crate::tree::{InstanceId, PluginTree, nested_plugins};

/// Resolved dependencies of one instance: type, then argument name.
pub type Dependencies = IndexMap<String, IndexMap<String, InstanceId>>;

/// Wires the declared dependencies of every instance, starting at the root.
pub fn resolve_dependencies(tree: &mut PluginTree, registry: &PluginRegistry) -> EngineResult<()> {
    resolve_instance(tree, registry, tree.root())
}

fn resolve_instance(
    tree: &mut PluginTree,
    registry: &PluginRegistry,
    id: InstanceId,
) -> EngineResult<()> {
    let core = &tree.instance(id).core;
    let slots = registry
        .get(&core.plugin_type, &core.plugin_id)
        .map(|descriptor| descriptor.dependencies())
        .unwrap_or_default();

    let lookup = |plugin_type: &str, arg: &str| {
        let found = tree.find(plugin_type, arg)?;
        Some((found, tree.instance(found).core.qualified_id()))
    };
    let dependencies = match_slots(&slots, &core.args, lookup)
        .map_err(|message| EngineError::Dependency(core.failure(message)))?;
    if !dependencies.is_empty() {
        debug!(
            plugin = %core.plugin_id,
            path = %core.location(),
            count = dependencies.values().map(IndexMap::len).sum::<usize>(),
            "dependencies resolved"
        );
    }
    let children = nested_plugins(&core.config);
    tree.set_dependencies(id, dependencies);

    for child in children {
        resolve_instance(tree, registry, child)?;
    }
    Ok(())
}

/// Matches positional `args` against declared `slots`.
///
/// `lookup` finds the instance a type/argument pair refers to, along with the
/// qualified id of its plugin.
pub fn match_slots<F>(slots: &[DependencySlot], args: &[String], lookup: F) -> Result<Dependencies, String>
where
    F: Fn(&str, &str) -> Option<(InstanceId, QualifiedName)>,
{
    if slots.len() != args.len() {
        return Err(format!(
            "plugin declares {} dependency(s) but {} argument(s) were given",
            slots.len(),
            args.len()
        ));
    }

    let mut remaining: Vec<&String> = args.iter().collect();
    let mut unresolved = Vec::new();
    let mut dependencies = Dependencies::new();
    for slot in slots {
        let matched = remaining.iter().enumerate().find_map(|(index, arg)| {
            let (found, plugin_id) = lookup(&slot.plugin_type, arg)?;
            slot.name.accepts(&plugin_id).then_some((index, found))
        });
        match matched {
            Some((index, found)) => {
                let arg = remaining.remove(index);
                dependencies
                    .entry(slot.plugin_type.clone())
                    .or_default()
                    .insert(arg.clone(), found);
            }
            None => unresolved.push(slot.to_string()),
        }
    }

    if !unresolved.is_empty() {
        return Err(format!(
            "Couldn't resolve required dependency(s): {}",
            unresolved.join(", ")
        ));
    }
    if !remaining.is_empty() {
        let extra: Vec<&str> = remaining.iter().map(|arg| arg.as_str()).collect();
        return Err(format!("Extra argument(s): {}", extra.join(", ")));
    }
    Ok(dependencies)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(plugin_type: &str, arg: &str) -> Option<(InstanceId, QualifiedName)> {
        match (plugin_type, arg) {
            ("service", "ids") => Some((1, QualifiedName::parse("counter"))),
            ("service", "other") => Some((2, QualifiedName::parse("ext.clock"))),
            ("field", "name") => Some((3, QualifiedName::parse("value"))),
            _ => None,
        }
    }

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn matches_by_type_and_name() {
        let slots = vec![
            DependencySlot::new("service", "counter"),
            DependencySlot::new("service", "ext.*"),
        ];
        let resolved = match_slots(&slots, &args(&["other", "ids"]), lookup).expect("resolve");
        assert_eq!(resolved["service"]["ids"], 1);
        assert_eq!(resolved["service"]["other"], 2);
    }

    #[test]
    fn count_mismatch_fails_regardless_of_order() {
        let slots = vec![DependencySlot::new("service", "counter")];
        let first = match_slots(&slots, &args(&["ids", "other"]), lookup).expect_err("too many");
        let second = match_slots(&slots, &args(&["other", "ids"]), lookup).expect_err("too many");
        assert_eq!(first, second);
    }

    #[test]
    fn reports_unresolved_slots() {
        let slots = vec![DependencySlot::new("service", "counter")];
        let err = match_slots(&slots, &args(&["other"]), lookup).expect_err("scope mismatch");
        assert_eq!(err, "Couldn't resolve required dependency(s): service(counter)");

        let err = match_slots(&slots, &args(&["missing"]), lookup).expect_err("unknown name");
        assert!(err.contains("service(counter)"));
    }

    #[test]
    fn no_slots_and_no_args_resolves_empty() {
        assert!(match_slots(&[], &[], lookup).expect("resolve").is_empty());
    }
}
