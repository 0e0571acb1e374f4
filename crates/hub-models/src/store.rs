//! The document store and search index interfaces consumed by the
//! core. The hub never depends on a concrete Mongo/Elasticsearch
//! client; production wiring of these traits lives outside this
//! workspace.

use crate::document::{BulkWriteReport, Document, Filter, IndexAction, Mutation, WriteOp};
use async_trait::async_trait;

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn find_one(&self, collection: &str, filter: &Filter) -> anyhow::Result<Option<Document>>;

    async fn find(&self, collection: &str, filter: &Filter) -> anyhow::Result<Vec<Document>>;

    async fn count(&self, collection: &str, filter: &Filter) -> anyhow::Result<u64>;

    async fn insert_many(
        &self,
        collection: &str,
        docs: Vec<Document>,
    ) -> anyhow::Result<BulkWriteReport>;

    async fn bulk_write(
        &self,
        collection: &str,
        ops: Vec<WriteOp>,
    ) -> anyhow::Result<BulkWriteReport>;

    async fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        mutation: &Mutation,
        upsert: bool,
    ) -> anyhow::Result<BulkWriteReport>;

    /// Renames `from` to `to`. If `to` already exists and `drop_target` is
    /// false, this is an error (mirrors Mongo's `renameCollection`).
    async fn rename(&self, from: &str, to: &str, drop_target: bool) -> anyhow::Result<()>;

    async fn drop(&self, collection: &str) -> anyhow::Result<()>;

    async fn list_collections(&self) -> anyhow::Result<Vec<String>>;

    /// A page of `_id`s from `collection`, ordered by id, `limit` at a
    /// time starting at `offset`. Lets a caller stream an entire
    /// collection's ids in bounded batches instead of loading it all at
    /// once. The default pulls every document through [`Self::find`] and
    /// slices in memory; backends that can push the pagination down
    /// (e.g. `LIMIT`/`OFFSET` in SQL) should override it.
    async fn find_ids_page(
        &self,
        collection: &str,
        offset: usize,
        limit: usize,
    ) -> anyhow::Result<Vec<String>> {
        let mut ids: Vec<String> = self
            .find(collection, &Filter::all())
            .await?
            .iter()
            .filter_map(crate::document::doc_id)
            .collect();
        ids.sort();
        Ok(ids.into_iter().skip(offset).take(limit).collect())
    }
}

/// The status of an asynchronous restore/reindex operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreStatus {
    InProgress,
    Done,
    Failed,
}

#[async_trait]
pub trait SearchIndex: Send + Sync {
    async fn create_index(
        &self,
        settings: serde_json::Value,
        mappings: serde_json::Value,
    ) -> anyhow::Result<()>;

    async fn delete_index(&self) -> anyhow::Result<()>;

    async fn exists_index(&self) -> anyhow::Result<bool>;

    async fn get_mapping(&self) -> anyhow::Result<serde_json::Value>;

    async fn put_mapping(&self, mappings: serde_json::Value) -> anyhow::Result<()>;

    async fn count(&self) -> anyhow::Result<u64>;

    async fn index_bulk(
        &self,
        docs: Vec<Document>,
        action: IndexAction,
    ) -> anyhow::Result<BulkWriteReport>;

    async fn get_docs(&self, ids: &[String]) -> anyhow::Result<Vec<Document>>;

    async fn mexists(&self, ids: &[String]) -> anyhow::Result<Vec<(String, bool)>>;

    async fn delete_docs(&self, ids: &[String]) -> anyhow::Result<()>;

    async fn get_repository(&self, name: &str) -> anyhow::Result<Option<serde_json::Value>>;

    async fn create_repository(&self, name: &str, settings: serde_json::Value) -> anyhow::Result<()>;

    async fn create_snapshot(
        &self,
        repo: &str,
        name: &str,
        indices: &[String],
    ) -> anyhow::Result<()>;

    async fn get_restore_status(&self, index: &str) -> anyhow::Result<RestoreStatus>;
}
