//! Kubernetes strategic-merge-patch planner (component C).
//!
//! Builds an `application/strategic-merge-patch+json` body from an old/new object pair,
//! using [`ResourceDescriptor::list_merge_strategies`] to decide whether an array field
//! is merged element-by-element (keyed by `x-kubernetes-patch-merge-key`) or replaced
//! wholesale. Unlike [`crate::json_patch`], the result here is itself a JSON document
//! (a sparse overlay), not an operation list.
use std::collections::BTreeSet;

use serde_json::{Map, Value};

use crate::error::{PointerError, StrategicMergeError};
use crate::json_patch::{parse_pointer, unescape_pointer_token};
use crate::resource::{ListMergeStrategy, ResourceDescriptor};

/// Plan a strategic-merge-patch body turning `old` into `new`.
///
/// `paths`, when non-empty, scopes the plan to just those JSON pointers (and anything
/// nested under them) -- everything else is left out of the resulting body even if it
/// differs. An empty `paths` plans the full object.
pub fn plan(
    descriptor: &ResourceDescriptor,
    old: &Value,
    new: &Value,
    paths: &[String],
) -> Result<Value, StrategicMergeError> {
    let scope = PathScope::new(paths)?;
    Ok(plan_value(descriptor, old, new, "", &scope).unwrap_or_else(|| Value::Object(Map::new())))
}

/// A set of JSON-pointer prefixes the plan is restricted to. Empty means unrestricted.
struct PathScope {
    prefixes: Vec<Vec<String>>,
}

impl PathScope {
    fn new(paths: &[String]) -> Result<Self, StrategicMergeError> {
        let mut prefixes = Vec::with_capacity(paths.len());
        for p in paths {
            let tokens = parse_pointer(p).map_err(|e| match e {
                PointerError::Malformed(m) => StrategicMergeError::InvalidPath(m),
                other => StrategicMergeError::Pointer(other),
            })?;
            prefixes.push(tokens);
        }
        Ok(Self { prefixes })
    }

    fn unrestricted(&self) -> bool {
        self.prefixes.is_empty()
    }

    /// Whether `tokens` is inside, equal to, or an ancestor of any scoped path (an
    /// ancestor still needs descending into, to reach the scoped descendant).
    fn touches(&self, tokens: &[String]) -> bool {
        if self.unrestricted() {
            return true;
        }
        self.prefixes.iter().any(|prefix| {
            let shorter = tokens.len().min(prefix.len());
            tokens[..shorter] == prefix[..shorter]
        })
    }

    /// Whether `tokens` is exactly at or below a scoped path (the field itself should be
    /// fully included, not just descended into).
    fn includes_fully(&self, tokens: &[String]) -> bool {
        if self.unrestricted() {
            return true;
        }
        self.prefixes.iter().any(|prefix| tokens.len() >= prefix.len() && tokens[..prefix.len()] == prefix[..])
    }
}

fn path_tokens(path: &str) -> Vec<String> {
    if path.is_empty() {
        Vec::new()
    } else {
        path.trim_start_matches('/').split('/').map(unescape_pointer_token).collect()
    }
}

fn plan_value(descriptor: &ResourceDescriptor, old: &Value, new: &Value, path: &str, scope: &PathScope) -> Option<Value> {
    if old == new {
        return None;
    }
    match (old, new) {
        (Value::Object(o), Value::Object(n)) => plan_object(descriptor, o, n, path, scope),
        (Value::Array(o), Value::Array(n)) => plan_array(descriptor, o, n, path, scope),
        _ => Some(new.clone()),
    }
}

fn plan_object(
    descriptor: &ResourceDescriptor,
    old: &Map<String, Value>,
    new: &Map<String, Value>,
    path: &str,
    scope: &PathScope,
) -> Option<Value> {
    let mut out = Map::new();
    let mut removed_keys = Vec::new();

    let mut keys: BTreeSet<&String> = old.keys().collect();
    keys.extend(new.keys());

    for key in keys {
        let child_path = format!("{path}/{key}");
        let child_tokens = path_tokens(&child_path);
        if !scope.touches(&child_tokens) {
            continue;
        }
        match (old.get(key), new.get(key)) {
            (Some(_), None) => removed_keys.push(key.clone()),
            (None, Some(new_value)) => {
                out.insert(key.clone(), new_value.clone());
            }
            (Some(old_value), Some(new_value)) => {
                if scope.includes_fully(&child_tokens) {
                    if let Some(child) = plan_value(descriptor, old_value, new_value, &child_path, scope) {
                        out.insert(key.clone(), child);
                    }
                } else if old_value != new_value {
                    // A scoped path descends through this key without naming it fully;
                    // recurse unconditionally so a deeper match still surfaces.
                    if let Some(child) = plan_value(descriptor, old_value, new_value, &child_path, scope) {
                        out.insert(key.clone(), child);
                    }
                }
            }
            (None, None) => unreachable!("key came from old or new"),
        }
    }

    for key in removed_keys {
        out.insert(key, Value::Null);
    }

    if out.is_empty() {
        None
    } else {
        Some(Value::Object(out))
    }
}

/// Plan one array field, dispatching on the descriptor's configured merge strategy.
fn plan_array(descriptor: &ResourceDescriptor, old: &[Value], new: &[Value], path: &str, scope: &PathScope) -> Option<Value> {
    match descriptor.merge_strategy_for(path) {
        ListMergeStrategy::MergeByKey(key) => plan_array_by_key(descriptor, old, new, path, &key, scope),
        ListMergeStrategy::Replace => {
            if old == new {
                None
            } else {
                Some(Value::Array(new.to_vec()))
            }
        }
    }
}

fn merge_key_value(item: &Value, key: &str) -> Option<Value> {
    item.get(key).cloned()
}

/// Merge-key array strategy: items are matched across old/new by `key`, merged
/// individually when both sides have an entry, appended when only `new` does, and
/// marked with `{key: ..., "$patch": "delete"}` when only `old` does. Order follows
/// `new`, with deletions appended at the end as the strategic-merge-patch format
/// requires.
fn plan_array_by_key(
    descriptor: &ResourceDescriptor,
    old: &[Value],
    new: &[Value],
    path: &str,
    key: &str,
    scope: &PathScope,
) -> Option<Value> {
    let old_by_key: Vec<(Value, &Value)> = old
        .iter()
        .filter_map(|item| merge_key_value(item, key).map(|k| (k, item)))
        .collect();
    let new_by_key: Vec<(Value, &Value)> = new
        .iter()
        .filter_map(|item| merge_key_value(item, key).map(|k| (k, item)))
        .collect();

    let mut out = Vec::new();
    let mut changed = false;

    for (new_key, new_item) in &new_by_key {
        match old_by_key.iter().find(|(k, _)| k == new_key) {
            Some((_, old_item)) => {
                let child_path = format!("{path}/{}", key_display(new_key));
                match plan_value(descriptor, old_item, new_item, &child_path, scope) {
                    Some(Value::Object(mut fields)) => {
                        fields.insert(key.to_string(), new_key.clone());
                        out.push(Value::Object(fields));
                        changed = true;
                    }
                    Some(other) => {
                        // type changed under the merge key; fall back to a full replace
                        out.push(other);
                        changed = true;
                    }
                    None => {
                        // Unchanged items still need to appear so the merge key anchors
                        // the list; the API server reconciles by key, not by position.
                        out.push((*new_item).clone());
                    }
                }
            }
            None => {
                out.push((*new_item).clone());
                changed = true;
            }
        }
    }

    for (old_key, _) in &old_by_key {
        if !new_by_key.iter().any(|(k, _)| k == old_key) {
            let mut deletion = Map::new();
            deletion.insert(key.to_string(), old_key.clone());
            deletion.insert("$patch".to_string(), Value::String("delete".to_string()));
            out.push(Value::Object(deletion));
            changed = true;
        }
    }

    if changed {
        Some(Value::Array(out))
    } else {
        None
    }
}

fn key_display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn descriptor(list_merge_strategies: BTreeMap<String, ListMergeStrategy>) -> ResourceDescriptor {
        ResourceDescriptor {
            group: "apps".into(),
            version: "v1".into(),
            kind: "Deployment".into(),
            plural: "deployments".into(),
            namespaced: true,
            api_path_template: "/apis/apps/v1/namespaces/{namespace}/deployments".into(),
            supported_patch_kinds: vec![],
            list_merge_strategies,
        }
    }

    #[test]
    fn scalar_field_change() {
        let d = descriptor(BTreeMap::new());
        let old = json!({"spec": {"replicas": 1}});
        let new = json!({"spec": {"replicas": 3}});
        let patch = plan(&d, &old, &new, &[]).unwrap();
        assert_eq!(patch, json!({"spec": {"replicas": 3}}));
    }

    #[test]
    fn removed_field_becomes_null() {
        let d = descriptor(BTreeMap::new());
        let old = json!({"metadata": {"labels": {"a": "1", "b": "2"}}});
        let new = json!({"metadata": {"labels": {"a": "1"}}});
        let patch = plan(&d, &old, &new, &[]).unwrap();
        assert_eq!(patch, json!({"metadata": {"labels": {"b": null}}}));
    }

    #[test]
    fn merge_key_array_add_update_delete() {
        let mut strategies = BTreeMap::new();
        strategies.insert("/spec/containers".to_string(), ListMergeStrategy::MergeByKey("name".into()));
        let d = descriptor(strategies);

        let old = json!({"spec": {"containers": [
            {"name": "a", "image": "a:1"},
            {"name": "b", "image": "b:1"},
        ]}});
        let new = json!({"spec": {"containers": [
            {"name": "a", "image": "a:2"},
            {"name": "c", "image": "c:1"},
        ]}});

        let patch = plan(&d, &old, &new, &[]).unwrap();
        let containers = patch["spec"]["containers"].as_array().unwrap();

        assert!(containers.iter().any(|c| c["name"] == "a" && c["image"] == "a:2"));
        assert!(containers.iter().any(|c| c["name"] == "c" && c["image"] == "c:1"));
        assert!(containers
            .iter()
            .any(|c| c["name"] == "b" && c["$patch"] == "delete"));
    }

    #[test]
    fn replace_strategy_replaces_wholesale_on_any_difference() {
        let d = descriptor(BTreeMap::new());
        let old = json!({"spec": {"finalizers": ["a", "b"]}});
        let new = json!({"spec": {"finalizers": ["a", "c"]}});
        let patch = plan(&d, &old, &new, &[]).unwrap();
        assert_eq!(patch, json!({"spec": {"finalizers": ["a", "c"]}}));
    }

    #[test]
    fn path_scoping_excludes_untouched_fields() {
        let d = descriptor(BTreeMap::new());
        let old = json!({"spec": {"replicas": 1, "paused": false}});
        let new = json!({"spec": {"replicas": 3, "paused": true}});
        let patch = plan(&d, &old, &new, &["/spec/replicas".to_string()]).unwrap();
        assert_eq!(patch, json!({"spec": {"replicas": 3}}));
    }

    #[test]
    fn unscoped_fields_produce_no_patch() {
        let d = descriptor(BTreeMap::new());
        let old = json!({"spec": {"paused": false}});
        let new = json!({"spec": {"paused": true}});
        let patch = plan(&d, &old, &new, &["/spec/replicas".to_string()]).unwrap();
        assert_eq!(patch, json!({}));
    }

    #[test]
    fn identical_objects_plan_empty_patch() {
        let d = descriptor(BTreeMap::new());
        let doc = json!({"spec": {"replicas": 1}});
        let patch = plan(&d, &doc, &doc, &[]).unwrap();
        assert_eq!(patch, json!({}));
    }
}
