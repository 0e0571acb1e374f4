//! The document shape and write vocabulary shared by [`crate::store::DocumentStore`]
//! and [`crate::store::SearchIndex`].

use crate::DocId;
use serde_json::{Map, Value};

/// A single stored document. Always a JSON object; `_id` is required by
/// convention but not enforced at this layer (the inspector flags its
/// absence).
pub type Document = Map<String, Value>;

/// Returns the `_id` field of a document as a string, if present and
/// string-typed.
pub fn doc_id(doc: &Document) -> Option<DocId> {
    doc.get("_id").and_then(Value::as_str).map(str::to_owned)
}

/// A query filter. We only need the subset HubDB and the storage
/// strategies actually use: a flat map of field -> expected JSON value,
/// plus an `_id $in` shorthand used constantly by the builder and differ
/// for batch fetches.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct Filter {
    pub eq: std::collections::BTreeMap<String, Value>,
    pub id_in: Option<Vec<DocId>>,
}

impl Filter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn by_id(id: impl Into<DocId>) -> Self {
        Self {
            eq: std::collections::BTreeMap::new(),
            id_in: Some(vec![id.into()]),
        }
    }

    pub fn by_ids(ids: impl IntoIterator<Item = DocId>) -> Self {
        Self {
            eq: std::collections::BTreeMap::new(),
            id_in: Some(ids.into_iter().collect()),
        }
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.eq.insert(field.into(), value.into());
        self
    }

    /// Evaluates the filter against a document. Used by the in-memory
    /// and SQLite-scan store implementations.
    pub fn matches(&self, doc: &Document) -> bool {
        if let Some(ids) = &self.id_in {
            let Some(id) = doc_id(doc) else {
                return false;
            };
            if !ids.contains(&id) {
                return false;
            }
        }
        self.eq
            .iter()
            .all(|(k, v)| doc.get(k).map(|found| found == v).unwrap_or(false))
    }
}

/// The abstract mutation operators: `{set, unset, push, addToSet, pop}`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum Mutation {
    Set(std::collections::BTreeMap<String, Value>),
    Unset(Vec<String>),
    Push { field: String, value: Value },
    AddToSet { field: String, value: Value },
    /// `true` pops the last element, `false` the first.
    Pop { field: String, last: bool },
}

impl Mutation {
    /// Applies this mutation to a document in place.
    pub fn apply(&self, doc: &mut Document) {
        match self {
            Mutation::Set(fields) => {
                for (k, v) in fields {
                    set_path(doc, k, v.clone());
                }
            }
            Mutation::Unset(fields) => {
                for k in fields {
                    unset_path(doc, k);
                }
            }
            Mutation::Push { field, value } => {
                push_path(doc, field, value.clone(), false);
            }
            Mutation::AddToSet { field, value } => {
                push_path(doc, field, value.clone(), true);
            }
            Mutation::Pop { field, last } => {
                if let Some(Value::Array(arr)) = doc.get_mut(field.as_str()) {
                    if arr.is_empty() {
                        return;
                    }
                    if *last {
                        arr.pop();
                    } else {
                        arr.remove(0);
                    }
                }
            }
        }
    }
}

/// Sets a (possibly dotted) path to a value, creating intermediate objects.
fn set_path(doc: &mut Document, path: &str, value: Value) {
    let mut parts = path.split('.');
    let Some(first) = parts.next() else { return };
    let rest: Vec<&str> = parts.collect();
    if rest.is_empty() {
        doc.insert(first.to_string(), value);
        return;
    }
    let entry = doc
        .entry(first.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if !entry.is_object() {
        *entry = Value::Object(Map::new());
    }
    if let Value::Object(inner) = entry {
        set_path(inner, &rest.join("."), value);
    }
}

fn unset_path(doc: &mut Document, path: &str) {
    if let Some((head, rest)) = path.split_once('.') {
        if let Some(Value::Object(inner)) = doc.get_mut(head) {
            unset_path(inner, rest);
        }
    } else {
        doc.remove(path);
    }
}

fn push_path(doc: &mut Document, field: &str, value: Value, dedup: bool) {
    let entry = doc
        .entry(field.to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    if !entry.is_array() {
        *entry = Value::Array(Vec::new());
    }
    if let Value::Array(arr) = entry {
        if dedup && arr.contains(&value) {
            return;
        }
        arr.push(value);
    }
}

/// `index_bulk`'s action kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexAction {
    Index,
    Create,
    Update,
}

/// A single operation of a `bulk_write` call.
#[derive(Debug, Clone)]
pub enum WriteOp {
    InsertOne(Document),
    UpdateOne { id: DocId, mutation: Mutation },
    ReplaceOne { id: DocId, doc: Document },
    DeleteOne { id: DocId },
}

/// One offending write within a bulk operation, as surfaced by the
/// store's per-op `writeErrors` list with the offending `_id`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct WriteError {
    pub id: DocId,
    pub message: String,
}

/// The structured result of an `insert_many`/`bulk_write` call.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct BulkWriteReport {
    pub n_inserted: u64,
    pub n_updated: u64,
    pub n_deleted: u64,
    pub write_errors: Vec<WriteError>,
}

impl BulkWriteReport {
    pub fn total_written(&self) -> u64 {
        self.n_inserted + self.n_updated
    }

    pub fn merge(&mut self, other: BulkWriteReport) {
        self.n_inserted += other.n_inserted;
        self.n_updated += other.n_updated;
        self.n_deleted += other.n_deleted;
        self.write_errors.extend(other.write_errors);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn filter_matches_by_id() {
        let doc: Document = json!({"_id": "a", "x": 1}).as_object().unwrap().clone();
        assert!(Filter::by_id("a").matches(&doc));
        assert!(!Filter::by_id("b").matches(&doc));
    }

    #[test]
    fn mutation_set_creates_nested_path() {
        let mut doc: Document = json!({"_id": "a"}).as_object().unwrap().clone();
        Mutation::Set(std::collections::BTreeMap::from([(
            "meta.count".to_string(),
            json!(3),
        )]))
        .apply(&mut doc);
        assert_eq!(doc["meta"]["count"], json!(3));
    }

    #[test]
    fn mutation_add_to_set_dedups() {
        let mut doc: Document = json!({"_id": "a", "tags": ["x"]}).as_object().unwrap().clone();
        Mutation::AddToSet {
            field: "tags".into(),
            value: json!("x"),
        }
        .apply(&mut doc);
        assert_eq!(doc["tags"], json!(["x"]));
    }
}
