//! The type tree walked out of a sequence of documents: per-key observed
//! kinds, nested object fields, and the parallel "observed inside a
//! list" branch used for scalar/list reconciliation.

use crate::error::InspectError;
use crate::kind::Kind;
use crate::stats::Stats;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Default)]
pub struct TypeNode {
    pub kinds: BTreeSet<Kind>,
    pub stats: Stats,
    pub object: BTreeMap<String, TypeNode>,
    /// Set when this key was observed as an array anywhere; holds the
    /// merged type of its elements.
    pub list: Option<Box<TypeNode>>,
}

impl TypeNode {
    fn record_scalar(&mut self, kind: Kind, stat_value: Option<f64>, deep: bool) {
        self.kinds.insert(kind);
        self.stats.record(stat_value, deep);
    }

    fn list_mut(&mut self) -> &mut TypeNode {
        self.list.get_or_insert_with(|| Box::new(TypeNode::default()))
    }

    /// Folds the scalar/object observations at this node into its list
    /// branch wherever both were observed, then recurses.
    pub fn reconcile(&mut self) {
        if let Some(list) = &mut self.list {
            if !self.kinds.is_empty() || !self.object.is_empty() {
                list.kinds.extend(self.kinds.iter().copied());
                list.stats.merge(&self.stats);
                for (k, v) in self.object.drain() {
                    merge_node(list.object.entry(k).or_default(), v);
                }
                self.kinds.clear();
            }
            list.reconcile();
        }
        for child in self.object.values_mut() {
            child.reconcile();
        }
    }

    pub fn finalize_deep(&mut self) {
        self.stats.finalize_deep();
        for child in self.object.values_mut() {
            child.finalize_deep();
        }
        if let Some(list) = &mut self.list {
            list.finalize_deep();
        }
    }
}

fn merge_node(target: &mut TypeNode, other: TypeNode) {
    target.kinds.extend(other.kinds);
    target.stats.merge(&other.stats);
    for (k, v) in other.object {
        merge_node(target.object.entry(k).or_default(), v);
    }
    if let Some(other_list) = other.list {
        merge_node(target.list_mut(), *other_list);
    }
}

/// Extracts the scalar used for `stats`: string/array/object length, or
/// the raw numeric value, for non-numeric leaves.
fn stat_value(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::String(s) => Some(s.chars().count() as f64),
        serde_json::Value::Array(a) => Some(a.len() as f64),
        serde_json::Value::Object(o) => Some(o.len() as f64),
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::Bool(_) | serde_json::Value::Null => None,
    }
}

/// Walks one JSON value into `node` at `path`, collecting non-finite
/// number errors: NaN and infinity are rejected with a location-tagged
/// error.
pub fn walk(
    value: &serde_json::Value,
    node: &mut TypeNode,
    path: &str,
    deep: bool,
    errors: &mut Vec<InspectError>,
) {
    match value {
        serde_json::Value::Null => node.record_scalar(Kind::Null, None, deep),
        serde_json::Value::Bool(_) => node.record_scalar(Kind::Bool, None, deep),
        serde_json::Value::Number(n) => {
            let as_f64 = n.as_f64();
            if let Some(f) = as_f64 {
                if !f.is_finite() {
                    errors.push(InspectError::NonFinite { path: path.to_string() });
                    return;
                }
            }
            let kind = if n.is_i64() || n.is_u64() { Kind::Int } else { Kind::Float };
            node.record_scalar(kind, as_f64, deep);
        }
        serde_json::Value::String(s) => {
            node.record_scalar(Kind::of_str(s), stat_value(value), deep);
        }
        serde_json::Value::Array(items) => {
            let list_node = node.list_mut();
            list_node.stats.record(stat_value(value), deep);
            for item in items {
                walk(item, list_node, path, deep, errors);
            }
        }
        serde_json::Value::Object(map) => {
            node.stats.record(stat_value(value), deep);
            for (k, v) in map {
                let child = node.object.entry(k.clone()).or_default();
                let child_path = if path.is_empty() { k.clone() } else { format!("{path}.{k}") };
                walk(v, child, &child_path, deep, errors);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn walk_records_nested_object_types() {
        let mut node = TypeNode::default();
        let mut errors = Vec::new();
        walk(&json!({"a": {"b": 1}}), &mut node, "", false, &mut errors);
        assert!(errors.is_empty());
        assert!(node.object["a"].object["b"].kinds.contains(&Kind::Int));
    }

    #[test]
    fn walk_rejects_nan_and_infinity() {
        let mut node = TypeNode::default();
        let mut errors = Vec::new();
        let value = json!({"x": f64::NAN});
        walk(&value, &mut node, "", false, &mut errors);
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn reconcile_folds_scalar_into_list() {
        let mut node = TypeNode::default();
        let mut errors = Vec::new();
        walk(&json!({"tags": "x"}), &mut node, "", false, &mut errors);
        walk(&json!({"tags": ["y", "z"]}), &mut node, "", false, &mut errors);
        node.reconcile();
        let tags = &node.object["tags"];
        assert!(tags.kinds.is_empty());
        assert!(tags.list.is_some());
        assert!(tags.list.as_ref().unwrap().kinds.contains(&Kind::Str));
    }
}
