//! The inspector's four report modes.

use crate::error::InspectError;
use crate::kind::Kind;
use crate::tree::{walk, TypeNode};
use hub_models::Document;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportMode {
    Type,
    Stats,
    DeepStats,
    Mapping,
}

pub struct Inspector;

impl Inspector {
    /// Traverses `docs` and produces the report named by `mode`. Returns
    /// the report tree serialized as JSON alongside any location-tagged
    /// errors found along the way.
    pub fn inspect(docs: &[Document], mode: ReportMode) -> (serde_json::Value, Vec<InspectError>) {
        tracing::debug!(count = docs.len(), ?mode, "inspecting documents");
        let deep = mode == ReportMode::DeepStats;
        let mut root = TypeNode::default();
        let mut errors = Vec::new();

        for (index, doc) in docs.iter().enumerate() {
            if !matches!(doc.get("_id"), Some(serde_json::Value::String(_))) {
                errors.push(InspectError::MissingId { index });
            }
            walk(&serde_json::Value::Object(doc.clone()), &mut root, "", deep, &mut errors);
        }

        root.reconcile();
        if deep {
            root.finalize_deep();
        }

        let report = match mode {
            ReportMode::Type => render_type(&root),
            ReportMode::Stats | ReportMode::DeepStats => render_stats(&root, deep),
            ReportMode::Mapping => render_mapping(&root),
        };
        (report, errors)
    }
}

fn render_type(node: &TypeNode) -> serde_json::Value {
    if let Some(list) = &node.list {
        return serde_json::json!({ "type": "list", "of": render_type(list) });
    }
    if !node.object.is_empty() {
        let props: serde_json::Map<String, serde_json::Value> = node
            .object
            .iter()
            .map(|(k, v)| (k.clone(), render_type(v)))
            .collect();
        return serde_json::Value::Object(props);
    }
    match Kind::dominant(&node.kinds) {
        Some(kind) => serde_json::to_value(kind).unwrap(),
        None => serde_json::Value::Null,
    }
}

fn render_stats(node: &TypeNode, deep: bool) -> serde_json::Value {
    if let Some(list) = &node.list {
        return render_stats(list, deep);
    }
    if !node.object.is_empty() {
        let props: serde_json::Map<String, serde_json::Value> = node
            .object
            .iter()
            .map(|(k, v)| (k.clone(), render_stats(v, deep)))
            .collect();
        return serde_json::Value::Object(props);
    }
    let mut obj = serde_json::to_value(&node.stats).unwrap();
    if let serde_json::Value::Object(map) = &mut obj {
        map.insert(
            "type".to_string(),
            Kind::dominant(&node.kinds)
                .map(|k| serde_json::to_value(k).unwrap())
                .unwrap_or(serde_json::Value::Null),
        );
    }
    obj
}

/// Collapses the type tree into a search-index mapping, applying type
/// precedence and object/array union.
fn render_mapping(node: &TypeNode) -> serde_json::Value {
    // object ∪ array at the same key: if both an object shape and a list
    // of objects were observed, their fields are merged before emission.
    let merged_object: std::collections::BTreeMap<&String, &TypeNode> = {
        let mut m: std::collections::BTreeMap<&String, &TypeNode> = node.object.iter().collect();
        if let Some(list) = &node.list {
            for (k, v) in &list.object {
                m.entry(k).or_insert(v);
            }
        }
        m
    };

    if !merged_object.is_empty() {
        let props: serde_json::Map<String, serde_json::Value> = merged_object
            .into_iter()
            .map(|(k, v)| (k.clone(), render_mapping(v)))
            .collect();
        return serde_json::json!({ "properties": props });
    }

    let kinds: std::collections::BTreeSet<Kind> = match &node.list {
        Some(list) => list.kinds.iter().chain(node.kinds.iter()).copied().collect(),
        None => node.kinds.clone(),
    };

    let es_type = match Kind::dominant(&kinds) {
        Some(Kind::SplitStr) => "text",
        Some(Kind::Str) => "keyword",
        Some(Kind::Float) => "float",
        Some(Kind::Int) => "long",
        Some(Kind::Bool) => "boolean",
        Some(Kind::Null) | None => "keyword",
    };
    serde_json::json!({ "type": es_type })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(v: serde_json::Value) -> Document {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn type_report_names_splitstr_and_int() {
        let docs = vec![doc(json!({"_id": "a", "name": "Homo sapiens", "age": 3}))];
        let (report, errors) = Inspector::inspect(&docs, ReportMode::Type);
        assert!(errors.is_empty());
        assert_eq!(report["name"], json!("split_str"));
        assert_eq!(report["age"], json!("int"));
    }

    #[test]
    fn flags_missing_id() {
        let docs = vec![doc(json!({"name": "no id here"}))];
        let (_, errors) = Inspector::inspect(&docs, ReportMode::Type);
        assert!(matches!(errors[0], InspectError::MissingId { index: 0 }));
    }

    #[test]
    fn mapping_promotes_float_over_int_across_documents() {
        let docs = vec![
            doc(json!({"_id": "a", "score": 1})),
            doc(json!({"_id": "b", "score": 1.5})),
        ];
        let (report, _) = Inspector::inspect(&docs, ReportMode::Mapping);
        assert_eq!(report["properties"]["score"]["type"], json!("float"));
    }

    #[test]
    fn mapping_unions_object_and_array_of_objects() {
        let docs = vec![
            doc(json!({"_id": "a", "authors": {"name": "x"}})),
            doc(json!({"_id": "b", "authors": [{"name": "y"}, {"affil": "z"}]})),
        ];
        let (report, _) = Inspector::inspect(&docs, ReportMode::Mapping);
        let authors = &report["properties"]["authors"]["properties"];
        assert_eq!(authors["name"]["type"], json!("keyword"));
        assert_eq!(authors["affil"]["type"], json!("keyword"));
    }

    #[test]
    fn stats_report_counts_and_bounds() {
        let docs = vec![
            doc(json!({"_id": "a", "v": 1})),
            doc(json!({"_id": "b", "v": 5})),
        ];
        let (report, _) = Inspector::inspect(&docs, ReportMode::Stats);
        assert_eq!(report["v"]["count"], json!(2));
        assert_eq!(report["v"]["min"], json!(1.0));
        assert_eq!(report["v"]["max"], json!(5.0));
    }
}
