//! Merge helpers for configuration and evaluation data.

use serde_json::{Map, Value};

/// Fills keys missing from `target` with entries from `defaults`, recursing
/// into mappings present on both sides. Existing values always win, including
/// explicit nulls, and sequences are never concatenated.
pub fn merge_missing(target: &mut Value, defaults: &Value) {
    let (Value::Object(target), Value::Object(defaults)) = (target, defaults) else {
        return;
    };
    merge_missing_map(target, defaults);
}

pub fn merge_missing_map(target: &mut Map<String, Value>, defaults: &Map<String, Value>) {
    for (key, default) in defaults {
        match target.get_mut(key) {
            Some(existing) => merge_missing(existing, default),
            None => {
                target.insert(key.clone(), default.clone());
            }
        }
    }
}

/// Recursively overlays `overlay` onto `base`; overlay values win on conflicts.
pub fn merge_overlay(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(key) {
                    Some(existing) => merge_overlay(existing, value),
                    None => {
                        base.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

/// Shallow union of two values: keys of `primary` win, keys only in `secondary`
/// are appended. Non-mapping operands count as empty mappings.
pub fn union(primary: &Value, secondary: &Value) -> Value {
    let mut merged = match primary {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    if let Value::Object(extra) = secondary {
        for (key, value) in extra {
            if !merged.contains_key(key) {
                merged.insert(key.clone(), value.clone());
            }
        }
    }
    Value::Object(merged)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn merge_missing_keeps_existing_values() {
        let mut config = json!({"var": null, "nested": {"a": 1}, "list": [1]});
        merge_missing(
            &mut config,
            &json!({"var": "row", "merge": "dest", "nested": {"a": 2, "b": 3}, "list": [2, 3]}),
        );
        assert_eq!(
            config,
            json!({"var": null, "nested": {"a": 1, "b": 3}, "list": [1], "merge": "dest"})
        );
    }

    #[test]
    fn overlay_replaces_scalars_and_merges_maps() {
        let mut base = json!({"bundle": {"name": "a", "path": "/x"}, "version": 1});
        merge_overlay(&mut base, &json!({"bundle": {"name": "b"}, "product": 0}));
        assert_eq!(
            base,
            json!({"bundle": {"name": "b", "path": "/x"}, "version": 1, "product": 0})
        );
    }

    #[test]
    fn union_prefers_primary_keys() {
        let merged = union(&json!({"a": 1}), &json!({"a": 2, "b": 3}));
        assert_eq!(merged, json!({"a": 1, "b": 3}));
        assert_eq!(union(&json!(null), &json!({"b": 1})), json!({"b": 1}));
    }
}
