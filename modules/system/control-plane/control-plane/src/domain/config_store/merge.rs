//! Merge rules for module configs.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

/// Returns `{...defaults, ...existing}`: every key already stored keeps its
/// value, `defaults` only fill the gaps.
///
/// Modules call this on every boot with their full default config, so
/// reversing the precedence would wipe operator customizations on restart.
#[must_use]
pub fn fill_missing(existing: &Map<String, Value>, defaults: &Map<String, Value>) -> Map<String, Value> {
    let mut merged = defaults.clone();
    for (key, value) in existing {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// Per-module overlay used when syncing the database document: entries in
/// `top` replace entries in `base`, entries only in `base` survive.
#[must_use]
pub fn overlay(
    mut base: BTreeMap<String, Value>,
    top: &BTreeMap<String, Value>,
) -> BTreeMap<String, Value> {
    for (module, config) in top {
        base.insert(module.clone(), config.clone());
    }
    base
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn existing_values_win_over_defaults() {
        let merged = fill_missing(&obj(json!({"a": 99})), &obj(json!({"a": 1, "b": 2})));
        assert_eq!(Value::Object(merged), json!({"a": 99, "b": 2}));
    }

    #[test]
    fn nested_objects_are_not_deep_merged() {
        let merged = fill_missing(
            &obj(json!({"smtp": {"host": "mx"}})),
            &obj(json!({"smtp": {"host": "localhost", "port": 25}})),
        );
        assert_eq!(Value::Object(merged), json!({"smtp": {"host": "mx"}}));
    }

    #[test]
    fn overlay_prefers_top_and_keeps_base_only_entries() {
        let base = BTreeMap::from([
            ("chat".to_owned(), json!({"v": 1})),
            ("auth".to_owned(), json!({"v": 1})),
        ]);
        let top = BTreeMap::from([("chat".to_owned(), json!({"v": 2}))]);
        let merged = overlay(base, &top);
        assert_eq!(merged["chat"], json!({"v": 2}));
        assert_eq!(merged["auth"], json!({"v": 1}));
    }
}
