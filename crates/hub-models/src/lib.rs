//! Shared data model for the hub: the types every other crate builds on.
//!
//! Covers the data model and the external interfaces. Nothing in here
//! talks to a concrete document store or search index -- those are
//! named only as the traits in [`store`].

pub mod diff;
pub mod document;
pub mod plugin;
pub mod source;
pub mod store;
pub mod target;

pub use diff::{DiffEntry, DiffFile, DiffMetadata};
pub use document::{BulkWriteReport, Document, Filter, IndexAction, Mutation, WriteError, WriteOp};
pub use plugin::{PluginRecord, PluginType};
pub use source::{DownloadState, PendingFlag, RunStatus, Source, SubSourceState, UploadState};
pub use store::{DocumentStore, RestoreStatus, SearchIndex};
pub use target::{BuildConfig, BuildRecord, BuildStatus};

/// A document's `_id`. Source/target collections are keyed by this.
pub type DocId = String;

/// The name of a source, a sub-source, a build config, or a plugin: all
/// are plain strings in this system, scoped by the collection they live in.
pub type Name = String;
