//! Dumper engine: per-source download state machine and protocol
//! drivers.

pub mod driver;
mod engine;

pub use driver::{DockerDriver, DownloadItem, DumperDriver, FtpDriver, GitDriver, HttpDriver, LocalFsDriver};
pub use engine::{CheckOnlyResult, Dumper, Error, Step};

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use hub_db::{HubDb, InMemoryHubStore};
    use hub_jobs::JobManager;
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    struct AlwaysFreshDriver {
        fetched: Arc<AtomicBool>,
    }

    #[async_trait]
    impl DumperDriver for AlwaysFreshDriver {
        fn plan(&self, data_folder: &Path) -> anyhow::Result<Vec<DownloadItem>> {
            Ok(vec![DownloadItem {
                remote: "https://example.com/data.tsv".to_string(),
                local: data_folder.join("data.tsv"),
            }])
        }

        async fn remote_is_better(&self, _item: &DownloadItem) -> anyhow::Result<bool> {
            Ok(true)
        }

        async fn fetch(&self, item: &DownloadItem) -> anyhow::Result<()> {
            if let Some(parent) = item.local.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&item.local, b"a\tb\n1\t2\n")?;
            self.fetched.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn detect_release(&self) -> anyhow::Result<String> {
            Ok("2024-01-01".to_string())
        }
    }

    #[tokio::test]
    async fn full_dump_marks_success_and_sets_upload_pending() {
        let tmp = tempfile::tempdir().unwrap();
        let db = HubDb::new(Arc::new(InMemoryHubStore::new()));
        let jobs = JobManager::new(2, 2);
        let fetched = Arc::new(AtomicBool::new(false));

        let dumper = Dumper::new(
            "demo",
            tmp.path(),
            true,
            true,
            Arc::new(AlwaysFreshDriver { fetched: fetched.clone() }),
            2,
            false,
            db.clone(),
            jobs,
        );

        let result = dumper
            .dump(&[Step::Check, Step::Download, Step::Post], false, false)
            .await
            .unwrap();
        assert!(result.is_none());
        assert!(fetched.load(Ordering::SeqCst));

        let source = db.get_source("demo").await.unwrap().unwrap();
        assert_eq!(source.download.status, hub_models::source::RunStatus::Success);
        assert!(source.pending.contains(&hub_models::source::PendingFlag::Upload));
        assert!(source.download.data_folder.unwrap().contains("2024-01-01"));
    }

    #[tokio::test]
    async fn check_only_returns_release_without_downloading() {
        let tmp = tempfile::tempdir().unwrap();
        let db = HubDb::new(Arc::new(InMemoryHubStore::new()));
        let jobs = JobManager::new(2, 2);
        let fetched = Arc::new(AtomicBool::new(false));

        let dumper = Dumper::new(
            "demo",
            tmp.path(),
            true,
            false,
            Arc::new(AlwaysFreshDriver { fetched: fetched.clone() }),
            2,
            false,
            db,
            jobs,
        );

        let result = dumper.dump(&[Step::Check], false, true).await.unwrap();
        assert_eq!(result.unwrap().release, "2024-01-01");
        assert!(!fetched.load(Ordering::SeqCst));
    }
}
