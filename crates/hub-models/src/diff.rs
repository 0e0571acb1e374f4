//! Diff file and diff-folder metadata shapes.

use crate::DocId;
use serde::{Deserialize, Serialize};

/// One `update` entry: a JSON-patch sequence (RFC 6902) against `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffEntry {
    pub id: DocId,
    pub patch: json_patch::Patch,
}

/// Whether `add` entries carry full documents (self-contained) or just
/// ids (patch-only, requiring downstream to fetch).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffVariant {
    PatchOnly,
    SelfContained,
}

/// Either bare ids (patch-only) or full documents (self-contained).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AddEntries {
    Ids(Vec<DocId>),
    Docs(Vec<crate::Document>),
}

impl AddEntries {
    pub fn len(&self) -> usize {
        match self {
            AddEntries::Ids(v) => v.len(),
            AddEntries::Docs(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ids(&self) -> Vec<DocId> {
        match self {
            AddEntries::Ids(v) => v.clone(),
            AddEntries::Docs(v) => v.iter().filter_map(crate::document::doc_id).collect(),
        }
    }
}

/// One batch artifact of a diff. A diff folder contains many such files
/// plus a `metadata.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffFile {
    pub add: AddEntries,
    pub delete: Vec<DocId>,
    pub update: Vec<DiffEntry>,
    pub source: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Which backends have applied this file (`sync`'s idempotence key).
    #[serde(default)]
    pub synced: std::collections::BTreeMap<String, bool>,
}

impl DiffFile {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.delete.is_empty() && self.update.is_empty()
    }
}

/// One file entry in `metadata.json`'s diff folder layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffFileEntry {
    pub filename: String,
    pub md5: String,
    pub adds: usize,
    pub updates: usize,
    pub deletes: usize,
}

/// `metadata.json`: written once at diff start, rewritten at the end
/// with final statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffMetadata {
    pub old: String,
    pub new: String,
    pub variant: DiffVariant,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
    /// Coarse content statistics from the `count` step: top-level key ->
    /// number of documents in `new` that have it.
    #[serde(default)]
    pub key_counts: std::collections::BTreeMap<String, u64>,
    #[serde(default)]
    pub files: Vec<DiffFileEntry>,
}

impl DiffMetadata {
    pub fn new(old: impl Into<String>, new: impl Into<String>, variant: DiffVariant) -> Self {
        Self {
            old: old.into(),
            new: new.into(),
            variant,
            started_at: chrono::Utc::now(),
            finished_at: None,
            key_counts: Default::default(),
            files: Vec::new(),
        }
    }

    pub fn total_adds(&self) -> usize {
        self.files.iter().map(|f| f.adds).sum()
    }
    pub fn total_updates(&self) -> usize {
        self.files.iter().map(|f| f.updates).sum()
    }
    pub fn total_deletes(&self) -> usize {
        self.files.iter().map(|f| f.deletes).sum()
    }
}
