//! JSON merge patch (RFC 7386) computation
//!
//! Status updates are sent as the structural difference between the object a
//! handler started from and its locally mutated copy, never as a full replace.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::Result;

/// Compute the merge patch turning `original` into `updated`
///
/// Objects are diffed key by key, removed keys become `null`, and anything
/// else that differs (scalars, arrays, type changes) is replaced wholesale.
pub fn create_merge_patch(original: &Value, updated: &Value) -> Value {
    match (original, updated) {
        (Value::Object(orig), Value::Object(upd)) => Value::Object(diff_objects(orig, upd)),
        _ => updated.clone(),
    }
}

fn diff_objects(original: &Map<String, Value>, updated: &Map<String, Value>) -> Map<String, Value> {
    let mut patch = Map::new();

    for (key, orig_value) in original {
        match updated.get(key) {
            None => {
                patch.insert(key.clone(), Value::Null);
            }
            Some(upd_value) if upd_value != orig_value => {
                let nested = match (orig_value, upd_value) {
                    (Value::Object(o), Value::Object(u)) => Value::Object(diff_objects(o, u)),
                    _ => upd_value.clone(),
                };
                patch.insert(key.clone(), nested);
            }
            Some(_) => {}
        }
    }

    for (key, upd_value) in updated {
        if !original.contains_key(key) {
            patch.insert(key.clone(), upd_value.clone());
        }
    }

    patch
}

/// Serialize both values and compute the patch between them
///
/// Returns `None` when the two serialize identically.
pub fn merge_patch_between<T: Serialize>(original: &T, updated: &T) -> Result<Option<Value>> {
    let original = serde_json::to_value(original)?;
    let updated = serde_json::to_value(updated)?;

    let patch = create_merge_patch(&original, &updated);
    match &patch {
        Value::Object(map) if map.is_empty() => Ok(None),
        _ => Ok(Some(patch)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn only_changed_fields_are_emitted() {
        let original = json!({
            "metadata": {"name": "b1", "resourceVersion": "7"},
            "spec": {"ttlSeconds": 600},
            "status": {"phase": "New"}
        });
        let updated = json!({
            "metadata": {"name": "b1", "resourceVersion": "7"},
            "spec": {"ttlSeconds": 600},
            "status": {"phase": "InProgress", "version": 1}
        });

        assert_eq!(
            create_merge_patch(&original, &updated),
            json!({"status": {"phase": "InProgress", "version": 1}})
        );
    }

    #[test]
    fn removed_keys_become_null() {
        let original = json!({"a": 1, "b": {"c": 2, "d": 3}});
        let updated = json!({"a": 1, "b": {"c": 2}});
        assert_eq!(create_merge_patch(&original, &updated), json!({"b": {"d": null}}));
    }

    #[test]
    fn arrays_are_replaced_wholesale() {
        let original = json!({"spec": {"excludedResources": ["a"]}});
        let updated = json!({"spec": {"excludedResources": ["a", "nodes"]}});
        assert_eq!(
            create_merge_patch(&original, &updated),
            json!({"spec": {"excludedResources": ["a", "nodes"]}})
        );
    }

    #[test]
    fn missing_parent_object_is_added_in_full() {
        let original = json!({"metadata": {"name": "r"}});
        let updated = json!({"metadata": {"name": "r"}, "status": {"phase": "InProgress"}});
        assert_eq!(
            create_merge_patch(&original, &updated),
            json!({"status": {"phase": "InProgress"}})
        );
    }

    #[test]
    fn identical_values_produce_no_patch() {
        let value = json!({"a": [1, 2], "b": {"c": null}});
        assert_eq!(merge_patch_between(&value, &value).unwrap(), None);
    }
}
