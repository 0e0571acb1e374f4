//! Snapshot publisher: a small pre/snapshot/post step tracker for
//! publishing a full search-index snapshot, distinct from the
//! incremental diff-and-sync path in [`crate::syncer`]. Mirrors the
//! per-build-history job records kept for an incremental sync, against
//! the repository protocol (`get_repository`/`create_repository`/
//! `create_snapshot`/`get_restore_status`).

use hub_models::{RestoreStatus, SearchIndex};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Pre,
    Snapshot,
    Post,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone)]
pub struct StepRecord {
    pub step: Step,
    pub status: JobStatus,
    pub error: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("snapshot {0:?} already exists for index {1:?}; retry with purge")]
    ResourceConflict(String, String),
    #[error("search index error")]
    Index(#[source] anyhow::Error),
}

pub struct SnapshotPublisher {
    index: Arc<dyn SearchIndex>,
    index_name: String,
}

impl SnapshotPublisher {
    pub fn new(index: Arc<dyn SearchIndex>, index_name: impl Into<String>) -> Self {
        Self {
            index,
            index_name: index_name.into(),
        }
    }

    /// Runs the pre/snapshot/post sequence, returning one [`StepRecord`]
    /// per step attempted. Stops (without attempting later steps) at the
    /// first failure. Scenario: calling this with `purge=true` for a
    /// snapshot whose index already exists deletes it first and
    /// recreates; without `purge`, an existing index is a
    /// [`Error::ResourceConflict`] and only a `pre` failure record is
    /// returned.
    pub async fn publish(
        &self,
        repo: &str,
        snapshot_name: &str,
        purge: bool,
    ) -> Vec<StepRecord> {
        let mut records = Vec::new();

        if let Err(err) = self.pre(purge).await {
            records.push(StepRecord {
                step: Step::Pre,
                status: JobStatus::Failed,
                error: Some(err.to_string()),
            });
            return records;
        }
        records.push(StepRecord {
            step: Step::Pre,
            status: JobStatus::Success,
            error: None,
        });

        match self.snapshot(repo, snapshot_name).await {
            Ok(()) => records.push(StepRecord {
                step: Step::Snapshot,
                status: JobStatus::Success,
                error: None,
            }),
            Err(err) => {
                records.push(StepRecord {
                    step: Step::Snapshot,
                    status: JobStatus::Failed,
                    error: Some(err.to_string()),
                });
                return records;
            }
        }

        match self.post().await {
            Ok(()) => records.push(StepRecord {
                step: Step::Post,
                status: JobStatus::Success,
                error: None,
            }),
            Err(err) => records.push(StepRecord {
                step: Step::Post,
                status: JobStatus::Failed,
                error: Some(err.to_string()),
            }),
        }
        records
    }

    /// Resolves the purge/conflict decision against an existing
    /// same-named index before the repository call: `purge` deletes it;
    /// otherwise its presence is a [`Error::ResourceConflict`].
    async fn pre(&self, purge: bool) -> Result<(), Error> {
        let exists = self.index.exists_index().await.map_err(Error::Index)?;
        if exists {
            if purge {
                self.index.delete_index().await.map_err(Error::Index)?;
            } else {
                return Err(Error::ResourceConflict(
                    self.index_name.clone(),
                    self.index_name.clone(),
                ));
            }
        }
        Ok(())
    }

    async fn snapshot(&self, repo: &str, snapshot_name: &str) -> Result<(), Error> {
        if self
            .index
            .get_repository(repo)
            .await
            .map_err(Error::Index)?
            .is_none()
        {
            self.index
                .create_repository(repo, serde_json::json!({}))
                .await
                .map_err(Error::Index)?;
        }
        self.index
            .create_snapshot(repo, snapshot_name, std::slice::from_ref(&self.index_name))
            .await
            .map_err(Error::Index)
    }

    /// Polls restore status to completion. `get_restore_status` is
    /// defined against a restore rather than a create, but it is the
    /// only asynchronous-task status primitive the repository protocol
    /// exposes, so the post step reuses it to confirm the snapshot
    /// finished landing.
    async fn post(&self) -> Result<(), Error> {
        loop {
            match self
                .index
                .get_restore_status(&self.index_name)
                .await
                .map_err(Error::Index)?
            {
                RestoreStatus::Done => return Ok(()),
                RestoreStatus::Failed => {
                    return Err(Error::Index(anyhow::anyhow!("restore reported failed")))
                }
                RestoreStatus::InProgress => tokio::time::sleep(Duration::from_millis(20)).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hub_models::{BulkWriteReport, Document, IndexAction};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FakeIndex {
        index_exists: AtomicBool,
        deleted: AtomicBool,
        repo_exists: AtomicBool,
        repo_created: AtomicBool,
        snapshot_created: AtomicBool,
        restore_polls: AtomicUsize,
    }

    impl FakeIndex {
        fn new(index_exists: bool, repo_exists: bool) -> Self {
            Self {
                index_exists: AtomicBool::new(index_exists),
                deleted: AtomicBool::new(false),
                repo_exists: AtomicBool::new(repo_exists),
                repo_created: AtomicBool::new(false),
                snapshot_created: AtomicBool::new(false),
                restore_polls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl SearchIndex for FakeIndex {
        async fn create_index(&self, _settings: serde_json::Value, _mappings: serde_json::Value) -> anyhow::Result<()> {
            Ok(())
        }
        async fn delete_index(&self) -> anyhow::Result<()> {
            self.deleted.store(true, Ordering::SeqCst);
            self.index_exists.store(false, Ordering::SeqCst);
            Ok(())
        }
        async fn exists_index(&self) -> anyhow::Result<bool> {
            Ok(self.index_exists.load(Ordering::SeqCst))
        }
        async fn get_mapping(&self) -> anyhow::Result<serde_json::Value> {
            Ok(serde_json::json!({}))
        }
        async fn put_mapping(&self, _mappings: serde_json::Value) -> anyhow::Result<()> {
            Ok(())
        }
        async fn count(&self) -> anyhow::Result<u64> {
            Ok(0)
        }
        async fn index_bulk(&self, _docs: Vec<Document>, _action: IndexAction) -> anyhow::Result<BulkWriteReport> {
            Ok(BulkWriteReport::default())
        }
        async fn get_docs(&self, _ids: &[String]) -> anyhow::Result<Vec<Document>> {
            Ok(Vec::new())
        }
        async fn mexists(&self, _ids: &[String]) -> anyhow::Result<Vec<(String, bool)>> {
            Ok(Vec::new())
        }
        async fn delete_docs(&self, _ids: &[String]) -> anyhow::Result<()> {
            Ok(())
        }
        async fn get_repository(&self, _name: &str) -> anyhow::Result<Option<serde_json::Value>> {
            Ok(if self.repo_exists.load(Ordering::SeqCst) {
                Some(serde_json::json!({}))
            } else {
                None
            })
        }
        async fn create_repository(&self, _name: &str, _settings: serde_json::Value) -> anyhow::Result<()> {
            self.repo_created.store(true, Ordering::SeqCst);
            self.repo_exists.store(true, Ordering::SeqCst);
            Ok(())
        }
        async fn create_snapshot(&self, _repo: &str, _name: &str, _indices: &[String]) -> anyhow::Result<()> {
            self.snapshot_created.store(true, Ordering::SeqCst);
            Ok(())
        }
        async fn get_restore_status(&self, _index: &str) -> anyhow::Result<RestoreStatus> {
            let n = self.restore_polls.fetch_add(1, Ordering::SeqCst);
            Ok(if n == 0 { RestoreStatus::InProgress } else { RestoreStatus::Done })
        }
    }

    #[tokio::test]
    async fn publishes_a_fresh_snapshot_creating_the_repository_on_first_use() {
        let index = Arc::new(FakeIndex::new(false, false));
        let publisher = SnapshotPublisher::new(index.clone(), "mygenes_20240101");

        let records = publisher.publish("backups", "mygenes_20240101", false).await;
        assert!(records.iter().all(|r| r.status == JobStatus::Success));
        assert!(index.repo_created.load(Ordering::SeqCst));
        assert!(index.snapshot_created.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn conflicts_without_purge_when_the_index_already_exists() {
        let index = Arc::new(FakeIndex::new(true, true));
        let publisher = SnapshotPublisher::new(index.clone(), "mygenes_20240101");

        let records = publisher.publish("backups", "mygenes_20240101", false).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].step, Step::Pre);
        assert_eq!(records[0].status, JobStatus::Failed);
        assert!(records[0].error.as_ref().unwrap().contains("already exists"));
        assert!(!index.snapshot_created.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn purge_deletes_the_existing_index_then_recreates_the_snapshot() {
        let index = Arc::new(FakeIndex::new(true, true));
        let publisher = SnapshotPublisher::new(index.clone(), "mygenes_20240101");

        let records = publisher.publish("backups", "mygenes_20240101", true).await;
        assert!(records.iter().all(|r| r.status == JobStatus::Success));
        assert!(index.deleted.load(Ordering::SeqCst));
        assert!(index.snapshot_created.load(Ordering::SeqCst));
    }
}
