//! The `Source` entity: a named data origin, its download state, and
//! its per-sub-source upload state. Owned exclusively by HubDB; mutated
//! only by the dumper/uploader of the same id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The terminal-or-in-flight status shared by download and upload state
/// machines: `idle -> checking -> downloading -> post -> success|failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Idle,
    Checking,
    Downloading,
    Post,
    Success,
    Failed,
}

impl Default for RunStatus {
    fn default() -> Self {
        RunStatus::Idle
    }
}

impl RunStatus {
    /// A source/sub-source whose prior run ended `Downloading` or `Failed`
    /// is treated as `force` on the next invocation.
    pub fn implies_force(self) -> bool {
        matches!(self, RunStatus::Downloading | RunStatus::Failed)
    }
}

/// A source's download state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DownloadState {
    pub status: RunStatus,
    pub release: Option<String>,
    pub data_folder: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub time_in_s: Option<f64>,
    pub err: Option<String>,
    pub logfile: Option<String>,
    pub pid: Option<u32>,
}

/// Per-sub-source upload job state, keyed by sub-source name in
/// [`UploadState::jobs`] (`upload.jobs.<sub_source>.*`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubSourceState {
    pub status: RunStatus,
    pub step_started_at: Option<DateTime<Utc>>,
    pub pid: Option<u32>,
    pub logfile: Option<String>,
    pub time: Option<DateTime<Utc>>,
    pub time_in_s: Option<f64>,
    pub count: Option<u64>,
    /// Carried forward from the previous success so re-runs can compute
    /// freshness without re-reading history.
    pub last_success: Option<DateTime<Utc>>,
    pub err: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadState {
    pub jobs: std::collections::BTreeMap<String, SubSourceState>,
}

/// A pending flag on a source, consumed by the next poll of the relevant
/// manager (`dump`, `upload`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingFlag {
    Dump,
    Upload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    #[serde(default)]
    pub download: DownloadState,
    #[serde(default)]
    pub upload: UploadState,
    #[serde(default)]
    pub pending: std::collections::BTreeSet<PendingFlag>,
}

impl Source {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            download: DownloadState::default(),
            upload: UploadState::default(),
            pending: Default::default(),
        }
    }

    /// The data folder a dumper should (re)use for its next run: archival
    /// mode derives from `release`; non-archival is the literal `latest`.
    pub fn new_data_folder(&self, archive_root: &str, archival: bool, release: &str) -> String {
        if archival {
            format!("{archive_root}/{}/{release}", self.id)
        } else {
            format!("{archive_root}/{}/latest", self.id)
        }
    }

    pub fn has_successful_dump(&self) -> bool {
        self.download.status == RunStatus::Success && self.download.data_folder.is_some()
    }
}
