//! Deep-merge logic backing the `Merge` and `RootKeyMerge` strategies.

use hub_models::Document;
use serde_json::Value;

use crate::AS_LIST_OF_DICT_HINT;

/// Merges `new` into `existing`, recursively: scalars are overwritten,
/// objects are merged key-by-key, and arrays are unioned. If `new`
/// carries the `__aslistofdict__` hint for a field, the two arrays at
/// that field are merged as lists of dicts keyed by `_id` rather than
/// value-unioned.
pub fn deep_merge(mut existing: Document, new: Document) -> Document {
    let hinted_fields = list_of_dict_fields(&new);
    for (key, new_value) in new {
        if key == AS_LIST_OF_DICT_HINT {
            continue;
        }
        match existing.remove(&key) {
            Some(old_value) => {
                let merged = merge_value(old_value, new_value, hinted_fields.contains(key.as_str()));
                existing.insert(key, merged);
            }
            None => {
                existing.insert(key, new_value);
            }
        }
    }
    existing
}

fn list_of_dict_fields(doc: &Document) -> std::collections::HashSet<String> {
    match doc.get(AS_LIST_OF_DICT_HINT) {
        Some(Value::Array(fields)) => fields
            .iter()
            .filter_map(|v| v.as_str().map(str::to_owned))
            .collect(),
        _ => Default::default(),
    }
}

fn merge_value(old: Value, new: Value, as_list_of_dict: bool) -> Value {
    match (old, new) {
        (Value::Object(mut o), Value::Object(n)) => {
            for (k, v) in n {
                let merged = match o.remove(&k) {
                    Some(existing) => merge_value(existing, v, false),
                    None => v,
                };
                o.insert(k, merged);
            }
            Value::Object(o)
        }
        (Value::Array(o), Value::Array(n)) if as_list_of_dict => {
            Value::Array(merge_list_of_dicts(o, n))
        }
        (Value::Array(mut o), Value::Array(n)) => {
            for item in n {
                if !o.contains(&item) {
                    o.push(item);
                }
            }
            Value::Array(o)
        }
        // Anything else (scalar vs scalar, or a type change): the new
        // value wins.
        (_, new) => new,
    }
}

/// Merges two arrays of objects keyed by `_id`: entries sharing an `_id`
/// are deep-merged, the rest are concatenated.
fn merge_list_of_dicts(old: Vec<Value>, new: Vec<Value>) -> Vec<Value> {
    let mut by_id: std::collections::BTreeMap<String, Value> = std::collections::BTreeMap::new();
    let mut unkeyed = Vec::new();
    for item in old {
        match item.get("_id").and_then(Value::as_str).map(str::to_owned) {
            Some(id) => {
                by_id.insert(id, item);
            }
            None => unkeyed.push(item),
        }
    }
    for item in new {
        match item.get("_id").and_then(Value::as_str).map(str::to_owned) {
            Some(id) => {
                let merged = match by_id.remove(&id) {
                    Some(existing) => merge_value(existing, item, false),
                    None => item,
                };
                by_id.insert(id, merged);
            }
            None => unkeyed.push(item),
        }
    }
    by_id.into_values().chain(unkeyed).collect()
}

/// Merges only at the top level: colliding keys whose values differ
/// become a two-element array (or the new value is appended if the
/// existing one is already an array).
pub fn merge_root_keys(mut existing: Document, new: Document) -> Document {
    for (key, new_value) in new {
        match existing.remove(&key) {
            Some(Value::Array(mut arr)) => {
                if !arr.contains(&new_value) {
                    arr.push(new_value);
                }
                existing.insert(key, Value::Array(arr));
            }
            Some(old_value) if old_value == new_value => {
                existing.insert(key, old_value);
            }
            Some(old_value) => {
                existing.insert(key, Value::Array(vec![old_value, new_value]));
            }
            None => {
                existing.insert(key, new_value);
            }
        }
    }
    existing
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(v: Value) -> Document {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn deep_merge_unions_plain_arrays() {
        let existing = doc(json!({"_id": "a", "tags": ["x"]}));
        let new = doc(json!({"_id": "a", "tags": ["y", "x"]}));
        let merged = deep_merge(existing, new);
        assert_eq!(merged["tags"], json!(["x", "y"]));
    }

    #[test]
    fn deep_merge_overwrites_scalars() {
        let existing = doc(json!({"_id": "a", "count": 1}));
        let new = doc(json!({"_id": "a", "count": 2}));
        let merged = deep_merge(existing, new);
        assert_eq!(merged["count"], json!(2));
    }

    #[test]
    fn deep_merge_honors_list_of_dict_hint() {
        let existing = doc(json!({"_id": "a", "refs": [{"_id": "r1", "n": 1}]}));
        let new = doc(json!({
            "_id": "a",
            "refs": [{"_id": "r1", "n": 2}, {"_id": "r2", "n": 3}],
            "__aslistofdict__": ["refs"]
        }));
        let merged = deep_merge(existing, new);
        let refs = merged["refs"].as_array().unwrap();
        assert_eq!(refs.len(), 2);
        let r1 = refs.iter().find(|r| r["_id"] == json!("r1")).unwrap();
        assert_eq!(r1["n"], json!(2));
        assert!(!merged.contains_key("__aslistofdict__"));
    }

    #[test]
    fn root_key_merge_collapses_to_array_on_conflict() {
        let existing = doc(json!({"_id": "a", "version": "1"}));
        let new = doc(json!({"_id": "a", "version": "2"}));
        let merged = merge_root_keys(existing, new);
        assert_eq!(merged["version"], json!(["1", "2"]));
    }
}
