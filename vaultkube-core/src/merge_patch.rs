//! RFC 7386 JSON Merge Patch, used by the REST client as the fallback patch encoding for
//! kinds that support neither strategic-merge nor JSON-Patch.
//!
//! Unlike [`crate::strategic_merge`], this has no notion of a resource's list-merge keys:
//! arrays are replaced wholesale whenever they differ, which is exactly RFC 7386's rule.
use serde_json::{Map, Value};

/// Compute the smallest RFC 7386 merge patch document that turns `old` into `new`.
pub fn diff(old: &Value, new: &Value) -> Value {
    match (old, new) {
        (Value::Object(old_map), Value::Object(new_map)) => {
            let mut patch = Map::new();
            for key in old_map.keys() {
                if !new_map.contains_key(key) {
                    patch.insert(key.clone(), Value::Null);
                }
            }
            for (key, new_v) in new_map {
                match old_map.get(key) {
                    Some(old_v) if old_v == new_v => {}
                    Some(old_v) => {
                        let sub = diff(old_v, new_v);
                        let omit = matches!((&sub, old_v), (Value::Object(m), Value::Object(_)) if m.is_empty());
                        if !omit {
                            patch.insert(key.clone(), sub);
                        }
                    }
                    None => {
                        patch.insert(key.clone(), new_v.clone());
                    }
                }
            }
            Value::Object(patch)
        }
        _ => new.clone(),
    }
}

/// Apply a merge patch document to `doc`, per RFC 7386 §2.
pub fn apply(doc: &Value, patch: &Value) -> Value {
    match patch {
        Value::Object(patch_map) => {
            let mut out = match doc {
                Value::Object(m) => m.clone(),
                _ => Map::new(),
            };
            for (key, patch_v) in patch_map {
                if patch_v.is_null() {
                    out.remove(key);
                } else {
                    let merged = apply(out.get(key).unwrap_or(&Value::Null), patch_v);
                    out.insert(key.clone(), merged);
                }
            }
            Value::Object(out)
        }
        _ => patch.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalar_field_change_patches_just_that_field() {
        let old = json!({"a": 1, "b": 2});
        let new = json!({"a": 1, "b": 3});
        assert_eq!(diff(&old, &new), json!({"b": 3}));
    }

    #[test]
    fn removed_key_becomes_null() {
        let old = json!({"a": 1, "b": 2});
        let new = json!({"a": 1});
        assert_eq!(diff(&old, &new), json!({"b": null}));
    }

    #[test]
    fn added_key_is_included() {
        let old = json!({"a": 1});
        let new = json!({"a": 1, "c": 3});
        assert_eq!(diff(&old, &new), json!({"c": 3}));
    }

    #[test]
    fn array_differences_replace_wholesale() {
        let old = json!({"items": [1, 2, 3]});
        let new = json!({"items": [1, 2]});
        assert_eq!(diff(&old, &new), json!({"items": [1, 2]}));
    }

    #[test]
    fn nested_object_changes_recurse() {
        let old = json!({"spec": {"replicas": 1, "name": "x"}});
        let new = json!({"spec": {"replicas": 2, "name": "x"}});
        assert_eq!(diff(&old, &new), json!({"spec": {"replicas": 2}}));
    }

    #[test]
    fn identical_documents_patch_to_empty_object() {
        let doc = json!({"a": {"b": 1}});
        assert_eq!(diff(&doc, &doc), json!({}));
    }

    #[test]
    fn apply_round_trips_with_diff() {
        let old = json!({"a": 1, "b": {"c": 2, "d": 3}});
        let new = json!({"a": 1, "b": {"c": 5}});
        let patch = diff(&old, &new);
        assert_eq!(apply(&old, &patch), new);
    }

    #[test]
    fn apply_null_removes_key() {
        let doc = json!({"a": 1, "b": 2});
        let patch = json!({"b": null});
        assert_eq!(apply(&doc, &patch), json!({"a": 1}));
    }
}
