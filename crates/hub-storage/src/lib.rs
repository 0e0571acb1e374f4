//! Storage strategies: the polymorphic writer that resolves a plugin's
//! `on_duplicates` setting into a concrete write path.
//!
//! Defined against the abstract [`hub_models::DocumentStore`] interface
//! rather than a concrete Mongo/ES bulk-write idiom, so no storage
//! strategy leaks document-store-specific code through this layer.

mod merge;

use async_trait::async_trait;
use hub_models::{document, BulkWriteReport, Document, DocumentStore, WriteOp};
use std::sync::Arc;

pub use merge::{deep_merge, merge_root_keys};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("duplicate _id {0:?} in batch (basic storage treats this as fatal)")]
    DuplicateId(String),
    #[error("document store error")]
    Store(#[source] anyhow::Error),
}

/// The per-document hint controlling how sub-arrays merge under the
/// `Merge` strategy.
pub const AS_LIST_OF_DICT_HINT: &str = "__aslistofdict__";

/// The outcome of one `store` call: how many documents ended up in the
/// target (inserted + updated).
pub type StoreCount = u64;

/// A batch of parsed documents along with the limits a caller (usually
/// tests) may want to impose.
pub struct StoreOptions {
    pub batch_size: usize,
    /// Optional cap on the number of batches processed, for tests.
    pub max_batch_num: Option<usize>,
    /// If set, documents whose serialized size exceeds this are dropped
    /// with a warning rather than erroring.
    pub max_document_bytes: Option<usize>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            max_batch_num: None,
            max_document_bytes: None,
        }
    }
}

#[async_trait]
pub trait StorageStrategy: Send + Sync {
    /// Stores `docs` into `collection` of `store`, batched per `opts`.
    /// Returns the number of documents that ended up in the target.
    async fn store(
        &self,
        store: &(dyn DocumentStore),
        collection: &str,
        docs: Vec<Document>,
        opts: &StoreOptions,
    ) -> Result<StoreCount, Error>;
}

fn filter_oversized(docs: Vec<Document>, max_bytes: Option<usize>) -> Vec<Document> {
    let Some(limit) = max_bytes else { return docs };
    docs.into_iter()
        .filter(|doc| match serde_json::to_vec(doc) {
            Ok(bytes) if bytes.len() > limit => {
                tracing::warn!(
                    id = ?document::doc_id(doc),
                    size = bytes.len(),
                    limit,
                    "dropping oversized document"
                );
                false
            }
            _ => true,
        })
        .collect()
}

fn batches(docs: Vec<Document>, batch_size: usize, max_batch_num: Option<usize>) -> Vec<Vec<Document>> {
    let mut out: Vec<Vec<Document>> = docs
        .chunks(batch_size.max(1))
        .map(|c| c.to_vec())
        .collect();
    if let Some(max) = max_batch_num {
        out.truncate(max);
    }
    out
}

/// Plain batched insert; any duplicate `_id` is fatal.
pub struct Basic;

#[async_trait]
impl StorageStrategy for Basic {
    async fn store(
        &self,
        store: &(dyn DocumentStore),
        collection: &str,
        docs: Vec<Document>,
        opts: &StoreOptions,
    ) -> Result<StoreCount, Error> {
        let docs = filter_oversized(docs, opts.max_document_bytes);
        let mut total = 0u64;
        for batch in batches(docs, opts.batch_size, opts.max_batch_num) {
            let report = store
                .insert_many(collection, batch)
                .await
                .map_err(Error::Store)?;
            if let Some(err) = report.write_errors.first() {
                return Err(Error::DuplicateId(err.id.clone()));
            }
            total += report.total_written();
        }
        Ok(total)
    }
}

/// Batched insert; per-batch duplicate errors are counted and discarded.
pub struct IgnoreDuplicated;

#[async_trait]
impl StorageStrategy for IgnoreDuplicated {
    async fn store(
        &self,
        store: &(dyn DocumentStore),
        collection: &str,
        docs: Vec<Document>,
        opts: &StoreOptions,
    ) -> Result<StoreCount, Error> {
        let docs = filter_oversized(docs, opts.max_document_bytes);
        let mut total = 0u64;
        for batch in batches(docs, opts.batch_size, opts.max_batch_num) {
            let report = store
                .insert_many(collection, batch)
                .await
                .map_err(Error::Store)?;
            if !report.write_errors.is_empty() {
                tracing::debug!(
                    count = report.write_errors.len(),
                    "discarded duplicate documents"
                );
            }
            total += report.total_written();
        }
        Ok(total)
    }
}

/// One-by-one insert; used only for order-preserving pathological inputs.
pub struct NoBatchIgnoreDuplicated;

#[async_trait]
impl StorageStrategy for NoBatchIgnoreDuplicated {
    async fn store(
        &self,
        store: &(dyn DocumentStore),
        collection: &str,
        docs: Vec<Document>,
        opts: &StoreOptions,
    ) -> Result<StoreCount, Error> {
        let docs = filter_oversized(docs, opts.max_document_bytes);
        let mut total = 0u64;
        let mut batch_num = 0usize;
        for doc in docs {
            if let Some(max) = opts.max_batch_num {
                if batch_num >= max {
                    break;
                }
            }
            let report = store
                .insert_many(collection, vec![doc])
                .await
                .map_err(Error::Store)?;
            total += report.total_written();
            batch_num += 1;
        }
        Ok(total)
    }
}

/// On duplicate-key error within a batch, fetch the existing document,
/// deep-merge the new one into it (scalars + array union), and re-emit as
/// an update.
pub struct Merge;

#[async_trait]
impl StorageStrategy for Merge {
    async fn store(
        &self,
        store: &(dyn DocumentStore),
        collection: &str,
        docs: Vec<Document>,
        opts: &StoreOptions,
    ) -> Result<StoreCount, Error> {
        let docs = filter_oversized(docs, opts.max_document_bytes);
        let mut total = 0u64;
        for batch in batches(docs, opts.batch_size, opts.max_batch_num) {
            let mut to_merge = Vec::new();
            let report = store
                .insert_many(collection, batch.clone())
                .await
                .map_err(Error::Store)?;
            total += report.total_written();

            let dup_ids: std::collections::HashSet<String> =
                report.write_errors.iter().map(|e| e.id.clone()).collect();
            for doc in batch {
                if let Some(id) = document::doc_id(&doc) {
                    if dup_ids.contains(&id) {
                        to_merge.push((id, doc));
                    }
                }
            }

            for (id, new_doc) in to_merge {
                let filter = hub_models::Filter::by_id(id.clone());
                let Some(existing) = store.find_one(collection, &filter).await.map_err(Error::Store)? else {
                    continue;
                };
                let merged = deep_merge(existing, new_doc);
                let rep = store
                    .bulk_write(collection, vec![WriteOp::ReplaceOne { id, doc: merged }])
                    .await
                    .map_err(Error::Store)?;
                total += rep.total_written();
            }
        }
        Ok(total)
    }
}

/// Same trigger as `Merge`, but merges only first-level keys: same-key
/// collisions become lists.
pub struct RootKeyMerge;

#[async_trait]
impl StorageStrategy for RootKeyMerge {
    async fn store(
        &self,
        store: &(dyn DocumentStore),
        collection: &str,
        docs: Vec<Document>,
        opts: &StoreOptions,
    ) -> Result<StoreCount, Error> {
        let docs = filter_oversized(docs, opts.max_document_bytes);
        let mut total = 0u64;
        for batch in batches(docs, opts.batch_size, opts.max_batch_num) {
            let report = store
                .insert_many(collection, batch.clone())
                .await
                .map_err(Error::Store)?;
            total += report.total_written();

            let dup_ids: std::collections::HashSet<String> =
                report.write_errors.iter().map(|e| e.id.clone()).collect();
            for doc in batch {
                let Some(id) = document::doc_id(&doc) else { continue };
                if !dup_ids.contains(&id) {
                    continue;
                }
                let filter = hub_models::Filter::by_id(id.clone());
                let Some(existing) = store.find_one(collection, &filter).await.map_err(Error::Store)? else {
                    continue;
                };
                let merged = merge_root_keys(existing, doc);
                let rep = store
                    .bulk_write(collection, vec![WriteOp::ReplaceOne { id, doc: merged }])
                    .await
                    .map_err(Error::Store)?;
                total += rep.total_written();
            }
        }
        Ok(total)
    }
}

/// `replace_one` keyed by `_id`.
pub struct Upsert;

#[async_trait]
impl StorageStrategy for Upsert {
    async fn store(
        &self,
        store: &(dyn DocumentStore),
        collection: &str,
        docs: Vec<Document>,
        opts: &StoreOptions,
    ) -> Result<StoreCount, Error> {
        let docs = filter_oversized(docs, opts.max_document_bytes);
        let mut total = 0u64;
        for batch in batches(docs, opts.batch_size, opts.max_batch_num) {
            let ops = batch
                .into_iter()
                .filter_map(|doc| {
                    document::doc_id(&doc).map(|id| WriteOp::ReplaceOne { id, doc })
                })
                .collect();
            let report = store
                .bulk_write(collection, ops)
                .await
                .map_err(Error::Store)?;
            total += report.total_written();
        }
        Ok(total)
    }
}

/// Discards input; used by mapping-only plugins.
pub struct NoStorage;

#[async_trait]
impl StorageStrategy for NoStorage {
    async fn store(
        &self,
        _store: &(dyn DocumentStore),
        _collection: &str,
        _docs: Vec<Document>,
        _opts: &StoreOptions,
    ) -> Result<StoreCount, Error> {
        Ok(0)
    }
}

/// The `on_duplicates` manifest field resolves to one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnDuplicates {
    Error,
    Ignore,
    Merge,
}

pub fn strategy_for(on_duplicates: OnDuplicates) -> Arc<dyn StorageStrategy> {
    match on_duplicates {
        OnDuplicates::Error => Arc::new(Basic),
        OnDuplicates::Ignore => Arc::new(IgnoreDuplicated),
        OnDuplicates::Merge => Arc::new(Merge),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hub_models::DocumentStore as _;
    use serde_json::json;

    struct FakeStore(tokio::sync::Mutex<std::collections::HashMap<String, Document>>);

    #[async_trait]
    impl DocumentStore for FakeStore {
        async fn find_one(&self, _c: &str, filter: &hub_models::Filter) -> anyhow::Result<Option<Document>> {
            let map = self.0.lock().await;
            Ok(map.values().find(|d| filter.matches(d)).cloned())
        }
        async fn find(&self, _c: &str, filter: &hub_models::Filter) -> anyhow::Result<Vec<Document>> {
            let map = self.0.lock().await;
            Ok(map.values().filter(|d| filter.matches(d)).cloned().collect())
        }
        async fn count(&self, c: &str, f: &hub_models::Filter) -> anyhow::Result<u64> {
            Ok(self.find(c, f).await?.len() as u64)
        }
        async fn insert_many(&self, _c: &str, docs: Vec<Document>) -> anyhow::Result<BulkWriteReport> {
            let mut map = self.0.lock().await;
            let mut report = BulkWriteReport::default();
            for doc in docs {
                let id = document::doc_id(&doc).unwrap();
                if map.contains_key(&id) {
                    report.write_errors.push(hub_models::WriteError {
                        id,
                        message: "dup".into(),
                    });
                } else {
                    map.insert(id, doc);
                    report.n_inserted += 1;
                }
            }
            Ok(report)
        }
        async fn bulk_write(&self, _c: &str, ops: Vec<WriteOp>) -> anyhow::Result<BulkWriteReport> {
            let mut map = self.0.lock().await;
            let mut report = BulkWriteReport::default();
            for op in ops {
                match op {
                    WriteOp::ReplaceOne { id, doc } => {
                        map.insert(id, doc);
                        report.n_updated += 1;
                    }
                    WriteOp::InsertOne(doc) => {
                        let id = document::doc_id(&doc).unwrap();
                        map.insert(id, doc);
                        report.n_inserted += 1;
                    }
                    _ => {}
                }
            }
            Ok(report)
        }
        async fn update_one(&self, _: &str, _: &hub_models::Filter, _: &hub_models::Mutation, _: bool) -> anyhow::Result<BulkWriteReport> {
            unimplemented!()
        }
        async fn rename(&self, _: &str, _: &str, _: bool) -> anyhow::Result<()> {
            unimplemented!()
        }
        async fn drop(&self, _: &str) -> anyhow::Result<()> {
            unimplemented!()
        }
        async fn list_collections(&self) -> anyhow::Result<Vec<String>> {
            unimplemented!()
        }
    }

    fn doc(id: &str, extra: serde_json::Value) -> Document {
        let mut d = extra.as_object().cloned().unwrap_or_default();
        d.insert("_id".into(), json!(id));
        d
    }

    #[tokio::test]
    async fn basic_storage_is_fatal_on_duplicate() {
        let store = FakeStore(Default::default());
        let docs = vec![doc("a", json!({})), doc("a", json!({}))];
        let res = Basic.store(&store, "c", docs, &StoreOptions::default()).await;
        assert!(matches!(res, Err(Error::DuplicateId(_))));
    }

    #[tokio::test]
    async fn ignore_duplicated_discards_and_counts() {
        let store = FakeStore(Default::default());
        let docs = vec![doc("a", json!({})), doc("a", json!({}))];
        let count = IgnoreDuplicated
            .store(&store, "c", docs, &StoreOptions::default())
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn merge_combines_documents_on_duplicate() {
        let store = FakeStore(Default::default());
        store
            .insert_many("c", vec![doc("a", json!({"tags": ["x"]}))])
            .await
            .unwrap();
        let count = Merge
            .store(&store, "c", vec![doc("a", json!({"tags": ["y"]}))], &StoreOptions::default())
            .await
            .unwrap();
        assert_eq!(count, 1);
        let merged = store
            .find_one("c", &hub_models::Filter::by_id("a"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(merged["tags"], json!(["x", "y"]));
    }

    #[tokio::test]
    async fn no_storage_discards_everything() {
        let store = FakeStore(Default::default());
        let count = NoStorage
            .store(&store, "c", vec![doc("a", json!({}))], &StoreOptions::default())
            .await
            .unwrap();
        assert_eq!(count, 0);
        assert_eq!(store.count("c", &hub_models::Filter::all()).await.unwrap(), 0);
    }
}
