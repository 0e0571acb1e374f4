//! Source mappers: a named transformation applied to a source's
//! documents before merge, with possible one-to-many `_id` translation.

use hub_models::Document;
use std::collections::HashMap;
use std::sync::Arc;

pub trait Mapper: Send + Sync {
    /// Maps one source document into zero or more target documents.
    /// Expansion happens when a single source `_id` translates to several
    /// target `_id`s.
    fn map(&self, doc: Document) -> Vec<Document>;
}

/// The default mapper: transparent, one document in, the same document
/// out.
pub struct TransparentMapper;

impl Mapper for TransparentMapper {
    fn map(&self, doc: Document) -> Vec<Document> {
        vec![doc]
    }
}

/// Translates `_id` through an internal one-to-many lookup table, loaded
/// lazily on first use by the caller. Documents whose `_id` has no entry
/// pass through unchanged.
pub struct KeyLookupMapper {
    table: HashMap<String, Vec<String>>,
}

impl KeyLookupMapper {
    pub fn new(table: HashMap<String, Vec<String>>) -> Self {
        Self { table }
    }
}

impl Mapper for KeyLookupMapper {
    fn map(&self, doc: Document) -> Vec<Document> {
        let Some(id) = hub_models::document::doc_id(&doc) else {
            return vec![doc];
        };
        let Some(targets) = self.table.get(&id) else {
            return vec![doc];
        };
        targets
            .iter()
            .map(|new_id| {
                let mut out = doc.clone();
                out.insert("_id".into(), serde_json::Value::String(new_id.clone()));
                out
            })
            .collect()
    }
}

/// Resolves the mapper a source's master document names: a master
/// document per source names which mapper applies. Registration is by
/// name; unregistered or absent names fall back to [`TransparentMapper`].
#[derive(Default, Clone)]
pub struct MapperRegistry {
    mappers: HashMap<String, Arc<dyn Mapper>>,
}

impl MapperRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, mapper: Arc<dyn Mapper>) {
        self.mappers.insert(name.into(), mapper);
    }

    pub fn resolve(&self, name: Option<&str>) -> Arc<dyn Mapper> {
        match name.and_then(|n| self.mappers.get(n)) {
            Some(mapper) => mapper.clone(),
            None => Arc::new(TransparentMapper),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn transparent_mapper_is_identity() {
        let doc: Document = json!({"_id": "a"}).as_object().unwrap().clone();
        assert_eq!(TransparentMapper.map(doc.clone()), vec![doc]);
    }

    #[test]
    fn key_lookup_mapper_expands_one_to_many() {
        let mut table = HashMap::new();
        table.insert("a".to_string(), vec!["a1".to_string(), "a2".to_string()]);
        let mapper = KeyLookupMapper::new(table);
        let doc: Document = json!({"_id": "a", "v": 1}).as_object().unwrap().clone();
        let mapped = mapper.map(doc);
        assert_eq!(mapped.len(), 2);
        assert_eq!(mapped[0]["_id"], json!("a1"));
        assert_eq!(mapped[1]["_id"], json!("a2"));
    }

    #[test]
    fn key_lookup_mapper_passes_through_unknown_ids() {
        let mapper = KeyLookupMapper::new(HashMap::new());
        let doc: Document = json!({"_id": "z"}).as_object().unwrap().clone();
        assert_eq!(mapper.map(doc.clone()), vec![doc]);
    }

    #[test]
    fn registry_falls_back_to_transparent() {
        let registry = MapperRegistry::new();
        let mapper = registry.resolve(Some("unregistered"));
        let doc: Document = json!({"_id": "a"}).as_object().unwrap().clone();
        assert_eq!(mapper.map(doc.clone()), vec![doc]);
    }
}
