//! Syncer: `sync(target, old, new, batch_size, mode?, force?)`.

use crate::differ::Mode;
use crate::framing;
use crate::resolver::{CollectionRef, StoreResolver};
use hub_models::diff::{AddEntries, DiffFile, DiffMetadata};
use hub_models::{Document, Filter, IndexAction, SearchIndex, WriteOp};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncStats {
    pub applied: u64,
    pub skipped_conflicts: u64,
    pub files_synced: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("diff folder {0:?} has no metadata.json")]
    NoMetadata(PathBuf),
    #[error("store resolution failed")]
    Resolve(#[source] anyhow::Error),
    #[error("document store error")]
    Store(#[source] anyhow::Error),
    #[error("search index error")]
    Index(#[source] anyhow::Error),
    #[error("io error")]
    Io(#[source] std::io::Error),
    #[error("metadata serialization error")]
    Json(#[source] serde_json::Error),
    #[error("diff file framing error")]
    Frame(#[source] anyhow::Error),
}

/// Where a sync writes: a document store (`old`'s backend) or a search
/// index.
pub enum SyncTarget {
    Store { name: String, store: Arc<dyn hub_models::DocumentStore> },
    Index(Arc<dyn SearchIndex>),
}

pub struct Syncer {
    resolver: Arc<dyn StoreResolver>,
    diff_root: PathBuf,
}

impl Syncer {
    pub fn new(resolver: Arc<dyn StoreResolver>, diff_root: impl Into<PathBuf>) -> Self {
        Self {
            resolver,
            diff_root: diff_root.into(),
        }
    }

    pub async fn sync(
        &self,
        target_key: &str,
        target: &SyncTarget,
        old: CollectionRef,
        new: CollectionRef,
        _batch_size: usize,
        mode: Option<Mode>,
        force: bool,
    ) -> Result<SyncStats, Error> {
        let folder = self.diff_root.join(format!("{}-{}", old.label(), new.label()));
        let metadata_path = folder.join("metadata.json");
        if !metadata_path.exists() {
            return Err(Error::NoMetadata(folder));
        }
        let metadata: DiffMetadata = serde_json::from_slice(
            &std::fs::read(&metadata_path).map_err(Error::Io)?,
        )
        .map_err(Error::Json)?;
        let _ = mode;

        let new_store = self.resolver.resolve(&new).map_err(Error::Resolve)?;
        let new_collection = new.collection_name().to_string();

        let mut stats = SyncStats::default();
        for entry in &metadata.files {
            let path = folder.join(&entry.filename);
            let (_, mut file) = framing::decode(&std::fs::read(&path).map_err(Error::Io)?)
                .map_err(|e| Error::Frame(e.into()))?;

            if !force && file.synced.get(target_key).copied().unwrap_or(false) {
                continue;
            }

            let applied = self
                .apply_file(target, &file, new_store.as_ref(), &new_collection)
                .await?;
            stats.applied += applied.0;
            stats.skipped_conflicts += applied.1;

            file.synced.insert(target_key.to_string(), true);
            let (bytes, _) = framing::encode(&file, metadata.variant).map_err(Error::Frame)?;
            std::fs::write(&path, bytes).map_err(Error::Io)?;
            stats.files_synced += 1;
        }
        Ok(stats)
    }

    /// Returns `(applied, skipped_conflicts)`.
    async fn apply_file(
        &self,
        target: &SyncTarget,
        file: &DiffFile,
        new_store: &dyn hub_models::DocumentStore,
        new_collection: &str,
    ) -> Result<(u64, u64), Error> {
        match target {
            SyncTarget::Store { store, .. } => self.apply_to_store(store.as_ref(), file, new_store, new_collection).await,
            SyncTarget::Index(index) => self.apply_to_index(index.as_ref(), file, new_store, new_collection).await,
        }
    }

    async fn apply_to_store(
        &self,
        old_store: &dyn hub_models::DocumentStore,
        file: &DiffFile,
        new_store: &dyn hub_models::DocumentStore,
        new_collection: &str,
    ) -> Result<(u64, u64), Error> {
        let mut applied = 0u64;
        let mut conflicts = 0u64;

        let add_ids = file.add.ids();
        if !add_ids.is_empty() {
            let docs = match &file.add {
                AddEntries::Docs(docs) => docs.clone(),
                AddEntries::Ids(ids) => new_store
                    .find(new_collection, &Filter::by_ids(ids.clone()))
                    .await
                    .map_err(Error::Store)?,
            };
            for doc in docs {
                if let Some(id) = hub_models::document::doc_id(&doc) {
                    old_store
                        .bulk_write(new_collection, vec![WriteOp::ReplaceOne { id, doc }])
                        .await
                        .map_err(Error::Store)?;
                    applied += 1;
                }
            }
        }

        for entry in &file.update {
            let Some(mut doc) = old_store
                .find_one(new_collection, &Filter::by_id(entry.id.clone()))
                .await
                .map_err(Error::Store)?
            else {
                conflicts += 1;
                continue;
            };
            let mut value = serde_json::Value::Object(doc.clone());
            match json_patch::patch(&mut value, &entry.patch) {
                Ok(()) => {
                    if let serde_json::Value::Object(obj) = value {
                        doc = obj;
                    }
                    old_store
                        .bulk_write(
                            new_collection,
                            vec![WriteOp::ReplaceOne { id: entry.id.clone(), doc }],
                        )
                        .await
                        .map_err(Error::Store)?;
                    applied += 1;
                }
                Err(_) => conflicts += 1, // already applied: treated as skipped
            }
        }

        if !file.delete.is_empty() {
            let ops = file
                .delete
                .iter()
                .map(|id| WriteOp::DeleteOne { id: id.clone() })
                .collect();
            old_store.bulk_write(new_collection, ops).await.map_err(Error::Store)?;
            applied += file.delete.len() as u64;
        }
        Ok((applied, conflicts))
    }

    async fn apply_to_index(
        &self,
        index: &dyn SearchIndex,
        file: &DiffFile,
        new_store: &dyn hub_models::DocumentStore,
        new_collection: &str,
    ) -> Result<(u64, u64), Error> {
        let mut applied = 0u64;
        let mut conflicts = 0u64;

        let add_ids = file.add.ids();
        if !add_ids.is_empty() {
            let docs: Vec<Document> = match &file.add {
                AddEntries::Docs(docs) => docs.clone(),
                AddEntries::Ids(ids) => new_store
                    .find(new_collection, &Filter::by_ids(ids.clone()))
                    .await
                    .map_err(Error::Store)?,
            };
            let n = docs.len() as u64;
            index.index_bulk(docs, IndexAction::Create).await.map_err(Error::Index)?;
            applied += n;
        }

        if !file.update.is_empty() {
            let ids: Vec<String> = file.update.iter().map(|e| e.id.clone()).collect();
            let existing = index.get_docs(&ids).await.map_err(Error::Index)?;
            let mut by_id: std::collections::BTreeMap<String, Document> = existing
                .into_iter()
                .filter_map(|d| hub_models::document::doc_id(&d).map(|id| (id, d)))
                .collect();
            let mut to_reindex = Vec::new();
            for entry in &file.update {
                let Some(doc) = by_id.remove(&entry.id) else {
                    conflicts += 1;
                    continue;
                };
                let mut value = serde_json::Value::Object(doc);
                match json_patch::patch(&mut value, &entry.patch) {
                    Ok(()) => {
                        if let serde_json::Value::Object(obj) = value {
                            to_reindex.push(obj);
                            applied += 1;
                        }
                    }
                    Err(_) => conflicts += 1,
                }
            }
            if !to_reindex.is_empty() {
                index.index_bulk(to_reindex, IndexAction::Index).await.map_err(Error::Index)?;
            }
        }

        if !file.delete.is_empty() {
            index.delete_docs(&file.delete).await.map_err(Error::Index)?;
            applied += file.delete.len() as u64;
        }
        Ok((applied, conflicts))
    }
}

