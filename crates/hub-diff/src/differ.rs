//! Differ: `diff(old, new, batch_size, steps, mode, exclude)`.

use crate::framing;
use crate::resolver::{CollectionRef, StoreResolver};
use hub_models::diff::{AddEntries, DiffEntry, DiffFile, DiffFileEntry, DiffMetadata, DiffVariant};
use hub_models::{Document, Filter};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Count,
    Content,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Purge,
    None,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("diff folder {0:?} already has files; pass mode=purge to overwrite")]
    AlreadyExists(PathBuf),
    #[error("store resolution failed")]
    Resolve(#[source] anyhow::Error),
    #[error("document store error")]
    Store(#[source] anyhow::Error),
    #[error("io error")]
    Io(#[source] std::io::Error),
    #[error("metadata serialization error")]
    Json(#[source] serde_json::Error),
    #[error("diff file framing error")]
    Frame(#[source] anyhow::Error),
}

pub struct Differ {
    resolver: Arc<dyn StoreResolver>,
    diff_root: PathBuf,
}

impl Differ {
    pub fn new(resolver: Arc<dyn StoreResolver>, diff_root: impl Into<PathBuf>) -> Self {
        Self {
            resolver,
            diff_root: diff_root.into(),
        }
    }

    /// Diff folder path is a deterministic function of `(old, new)`.
    pub fn folder_for(&self, old: &CollectionRef, new: &CollectionRef) -> PathBuf {
        self.diff_root.join(format!("{}-{}", old.label(), new.label()))
    }

    pub async fn diff(
        &self,
        old: CollectionRef,
        new: CollectionRef,
        batch_size: usize,
        steps: &[Step],
        mode: Mode,
        exclude: &[String],
        variant: DiffVariant,
    ) -> Result<DiffMetadata, Error> {
        let folder = self.folder_for(&old, &new);
        prepare_folder(&folder, mode)?;

        let mut metadata = DiffMetadata::new(old.collection_name(), new.collection_name(), variant);
        write_metadata(&folder, &metadata)?;

        let old_store = self.resolver.resolve(&old).map_err(Error::Resolve)?;
        let new_store = self.resolver.resolve(&new).map_err(Error::Resolve)?;

        if steps.contains(&Step::Count) {
            self.run_count(new_store.as_ref(), new.collection_name(), &mut metadata)
                .await?;
        }
        if steps.contains(&Step::Content) {
            self.run_content(
                old_store.as_ref(),
                new_store.as_ref(),
                old.collection_name(),
                new.collection_name(),
                batch_size,
                exclude,
                variant,
                &folder,
                &mut metadata,
            )
            .await?;
        }

        metadata.finished_at = Some(chrono::Utc::now());
        write_metadata(&folder, &metadata)?;
        Ok(metadata)
    }

    async fn run_count(
        &self,
        new_store: &dyn hub_models::DocumentStore,
        new_collection: &str,
        metadata: &mut DiffMetadata,
    ) -> Result<(), Error> {
        let docs = new_store
            .find(new_collection, &Filter::all())
            .await
            .map_err(Error::Store)?;
        for doc in &docs {
            for key in doc.keys() {
                *metadata.key_counts.entry(key.clone()).or_insert(0) += 1;
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_content(
        &self,
        old_store: &dyn hub_models::DocumentStore,
        new_store: &dyn hub_models::DocumentStore,
        old_collection: &str,
        new_collection: &str,
        batch_size: usize,
        exclude: &[String],
        variant: DiffVariant,
        folder: &Path,
        metadata: &mut DiffMetadata,
    ) -> Result<(), Error> {
        let old_docs = old_store.find(old_collection, &Filter::all()).await.map_err(Error::Store)?;
        let new_docs = new_store.find(new_collection, &Filter::all()).await.map_err(Error::Store)?;

        let old_by_id: std::collections::BTreeMap<String, Document> = old_docs
            .into_iter()
            .filter_map(|d| hub_models::document::doc_id(&d).map(|id| (id, d)))
            .collect();
        let new_by_id: std::collections::BTreeMap<String, Document> = new_docs
            .into_iter()
            .filter_map(|d| hub_models::document::doc_id(&d).map(|id| (id, d)))
            .collect();

        let old_ids: BTreeSet<&String> = old_by_id.keys().collect();
        let new_ids: BTreeSet<&String> = new_by_id.keys().collect();

        // Pass 1: new-collection ids in batches -- common ids get
        // compared, new-only ids are adds.
        let new_id_list: Vec<&String> = new_ids.iter().copied().collect();
        for batch in new_id_list.chunks(batch_size.max(1)) {
            let mut file = DiffFile {
                add: match variant {
                    DiffVariant::PatchOnly => AddEntries::Ids(Vec::new()),
                    DiffVariant::SelfContained => AddEntries::Docs(Vec::new()),
                },
                delete: Vec::new(),
                update: Vec::new(),
                source: new_collection.to_string(),
                timestamp: chrono::Utc::now(),
                synced: Default::default(),
            };
            for id in batch {
                match old_by_id.get(*id) {
                    Some(old_doc) => {
                        let new_doc = &new_by_id[*id];
                        if let Some(patch) = diff_excluding(old_doc, new_doc, exclude) {
                            file.update.push(DiffEntry { id: (*id).clone(), patch });
                        }
                    }
                    None => {
                        let new_doc = &new_by_id[*id];
                        push_add(&mut file.add, (*id).clone(), new_doc.clone());
                    }
                }
            }
            write_batch_if_nonempty(folder, &mut file, metadata, variant)?;
        }

        // Pass 2: old-collection ids only in old are deletes.
        let delete_only: Vec<&String> = old_ids.difference(&new_ids).copied().collect();
        for batch in delete_only.chunks(batch_size.max(1)) {
            let mut file = DiffFile {
                add: match variant {
                    DiffVariant::PatchOnly => AddEntries::Ids(Vec::new()),
                    DiffVariant::SelfContained => AddEntries::Docs(Vec::new()),
                },
                delete: batch.iter().map(|id| (*id).clone()).collect(),
                update: Vec::new(),
                source: old_collection.to_string(),
                timestamp: chrono::Utc::now(),
                synced: Default::default(),
            };
            write_batch_if_nonempty(folder, &mut file, metadata, variant)?;
        }
        Ok(())
    }
}

fn push_add(add: &mut AddEntries, id: String, doc: Document) {
    match add {
        AddEntries::Ids(ids) => ids.push(id),
        AddEntries::Docs(docs) => docs.push(doc),
    }
}

/// Computes a JSON-patch between `old` and `new`, dropping operations
/// whose path is under any of `exclude`, and returns `None` if nothing
/// remains.
fn diff_excluding(old: &Document, new: &Document, exclude: &[String]) -> Option<json_patch::Patch> {
    let old_value = serde_json::Value::Object(old.clone());
    let new_value = serde_json::Value::Object(new.clone());
    let patch = json_patch::diff(&old_value, &new_value);

    let ops = serde_json::to_value(&patch).ok()?;
    let serde_json::Value::Array(ops) = ops else { return None };
    let filtered: Vec<serde_json::Value> = ops
        .into_iter()
        .filter(|op| {
            let path = op.get("path").and_then(|p| p.as_str()).unwrap_or("");
            !exclude.iter().any(|ex| path_under(path, ex))
        })
        .collect();
    if filtered.is_empty() {
        return None;
    }
    serde_json::from_value(serde_json::Value::Array(filtered)).ok()
}

fn path_under(path: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_start_matches('/');
    let path = path.trim_start_matches('/');
    path == prefix || path.starts_with(&format!("{prefix}/"))
}

fn prepare_folder(folder: &Path, mode: Mode) -> Result<(), Error> {
    if folder.exists() {
        let has_files = std::fs::read_dir(folder)
            .map_err(Error::Io)?
            .next()
            .is_some();
        if has_files {
            if mode == Mode::Purge {
                std::fs::remove_dir_all(folder).map_err(Error::Io)?;
            } else {
                return Err(Error::AlreadyExists(folder.to_path_buf()));
            }
        }
    }
    std::fs::create_dir_all(folder).map_err(Error::Io)
}

fn write_metadata(folder: &Path, metadata: &DiffMetadata) -> Result<(), Error> {
    let path = folder.join("metadata.json");
    let bytes = serde_json::to_vec_pretty(metadata).map_err(Error::Json)?;
    std::fs::write(path, bytes).map_err(Error::Io)
}

fn write_batch_if_nonempty(
    folder: &Path,
    file: &mut DiffFile,
    metadata: &mut DiffMetadata,
    variant: DiffVariant,
) -> Result<(), Error> {
    if file.is_empty() {
        return Ok(());
    }
    let (bytes, md5) = framing::encode(file, variant).map_err(Error::Frame)?;
    let filename = format!("diff_{}_{}.hdf", metadata.files.len(), random_suffix());
    std::fs::write(folder.join(&filename), &bytes).map_err(Error::Io)?;
    metadata.files.push(DiffFileEntry {
        filename,
        md5,
        adds: file.add.len(),
        updates: file.update.len(),
        deletes: file.delete.len(),
    });
    Ok(())
}

fn random_suffix() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    (0..6)
        .map(|_| rng.sample(rand::distributions::Alphanumeric) as char)
        .collect()
}
