use crate::pinfo::PInfo;
use crate::JobId;
use dashmap::DashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    Done,
    Failed,
}

#[derive(Debug, Clone)]
pub struct JobSnapshot {
    pub id: JobId,
    pub category: String,
    pub source: String,
    pub step: String,
    pub description: String,
    pub status: JobStatus,
    pub error: Option<String>,
}

/// The live job table consulted by predicates.
#[derive(Clone)]
pub struct JobTable {
    jobs: Arc<DashMap<JobId, JobSnapshot>>,
}

impl JobTable {
    pub fn new() -> Self {
        Self {
            jobs: Arc::new(DashMap::new()),
        }
    }

    pub fn insert(&self, id: JobId, info: PInfo) {
        self.jobs.insert(
            id,
            JobSnapshot {
                id,
                category: info.category,
                source: info.source,
                step: info.step,
                description: info.description,
                status: JobStatus::Running,
                error: None,
            },
        );
    }

    pub fn mark_done(&self, id: JobId) {
        if let Some(mut entry) = self.jobs.get_mut(&id) {
            entry.status = JobStatus::Done;
        }
    }

    pub fn mark_failed(&self, id: JobId, error: String) {
        if let Some(mut entry) = self.jobs.get_mut(&id) {
            entry.status = JobStatus::Failed;
            entry.error = Some(error);
        }
    }

    /// `true` if any job of `category` (optionally restricted to
    /// `source`) is currently `Running`.
    pub fn any_running(&self, category: &str, source: Option<&str>) -> bool {
        self.jobs.iter().any(|entry| {
            entry.status == JobStatus::Running
                && entry.category == category
                && source.map(|s| entry.source == s).unwrap_or(true)
        })
    }

    pub fn snapshot(&self) -> Vec<JobSnapshot> {
        self.jobs.iter().map(|e| e.clone()).collect()
    }
}

impl Default for JobTable {
    fn default() -> Self {
        Self::new()
    }
}
