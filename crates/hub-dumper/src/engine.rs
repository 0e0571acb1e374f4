//! Per-source dumper state machine.

use crate::driver::DumperDriver;
use hub_db::HubDb;
use hub_jobs::{JobManager, Predicate};
use hub_models::source::{PendingFlag, RunStatus};
use hub_models::Source;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Check,
    Download,
    Post,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("download failed")]
    Download(#[source] anyhow::Error),
    #[error("hub-db error")]
    Db(#[source] anyhow::Error),
    #[error("uncompressing archive failed")]
    Uncompress(#[source] anyhow::Error),
}

/// The outcome of a `dump` call when `check_only` is set and a new
/// release was found.
pub struct CheckOnlyResult {
    pub release: String,
}

pub struct Dumper {
    pub source_id: String,
    pub archive_root: PathBuf,
    pub archival: bool,
    pub auto_upload: bool,
    pub driver: Arc<dyn DumperDriver>,
    pub download_concurrency: usize,
    /// On opt-in, uncompress every archive under the new data folder.
    pub uncompress: bool,
    db: HubDb,
    jobs: JobManager,
}

impl Dumper {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source_id: impl Into<String>,
        archive_root: impl Into<PathBuf>,
        archival: bool,
        auto_upload: bool,
        driver: Arc<dyn DumperDriver>,
        download_concurrency: usize,
        uncompress: bool,
        db: HubDb,
        jobs: JobManager,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            archive_root: archive_root.into(),
            archival,
            auto_upload,
            driver,
            download_concurrency,
            uncompress,
            db,
            jobs,
        }
    }

    fn no_uploader_running(&self) -> Predicate {
        Predicate::no_uploader_running(self.source_id.clone())
    }

    /// Runs `steps` in order. Returns `Some(release)` only when
    /// `check_only` is set and a new release was detected without
    /// downloading.
    pub async fn dump(
        &self,
        steps: &[Step],
        force: bool,
        check_only: bool,
    ) -> Result<Option<CheckOnlyResult>, Error> {
        if !self.no_uploader_running().check(self.jobs.table()) {
            tracing::debug!(source = %self.source_id, "deferring dump: uploader is running");
        }

        let mut source = self
            .db
            .get_source(&self.source_id)
            .await
            .map_err(Error::Db)?
            .unwrap_or_else(|| Source::new(self.source_id.clone()));

        let force = force || source.download.status.implies_force();

        if steps.contains(&Step::Check) {
            match self.check(&mut source, force, check_only).await {
                Ok(Some(result)) => return Ok(Some(result)),
                Ok(None) => {}
                Err(err) => {
                    self.mark_failed(&mut source, &err).await;
                    return Err(err);
                }
            }
        }

        if steps.contains(&Step::Download) {
            if let Err(err) = self.download(&mut source).await {
                self.mark_failed(&mut source, &err).await;
                return Err(err);
            }
        }

        if steps.contains(&Step::Post) {
            if let Err(err) = self.post(&mut source).await {
                self.mark_failed(&mut source, &err).await;
                return Err(err);
            }
        }

        source.download.status = RunStatus::Success;
        source.download.finished_at = Some(chrono::Utc::now());
        if self.auto_upload {
            source.pending.insert(PendingFlag::Upload);
        }
        self.db.put_source(&source).await.map_err(Error::Db)?;
        Ok(None)
    }

    async fn check(
        &self,
        source: &mut Source,
        force: bool,
        check_only: bool,
    ) -> Result<Option<CheckOnlyResult>, Error> {
        source.download.status = RunStatus::Checking;
        source.download.started_at = Some(chrono::Utc::now());
        self.db.put_source(source).await.map_err(Error::Db)?;

        let release = self.driver.detect_release().await.map_err(Error::Download)?;
        let is_new_release = force || source.download.release.as_deref() != Some(release.as_str());

        if check_only {
            if is_new_release {
                return Ok(Some(CheckOnlyResult { release }));
            }
            return Ok(None);
        }

        source.download.release = Some(release.clone());
        source.download.data_folder = Some(source.new_data_folder(
            &self.archive_root.display().to_string(),
            self.archival,
            &release,
        ));
        Ok(None)
    }

    async fn download(&self, source: &mut Source) -> Result<(), Error> {
        source.download.status = RunStatus::Downloading;
        self.db.put_source(source).await.map_err(Error::Db)?;

        let data_folder = PathBuf::from(
            source
                .download
                .data_folder
                .clone()
                .ok_or_else(|| Error::Download(anyhow::anyhow!("no data folder set")))?,
        );
        std::fs::create_dir_all(&data_folder).map_err(|e| Error::Download(e.into()))?;

        let items = self.driver.plan(&data_folder).map_err(Error::Download)?;
        // Bounded concurrency: a fixed-size semaphore stands in for the
        // per-dumper transfer concurrency limit.
        let semaphore = Arc::new(Semaphore::new(self.download_concurrency.max(1)));
        let mut handles = Vec::new();
        for item in items {
            let driver = self.driver.clone();
            let semaphore = semaphore.clone();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore open");
                if driver.remote_is_better(&item).await? {
                    driver.fetch(&item).await?;
                }
                Ok::<(), anyhow::Error>(())
            }));
        }
        for handle in handles {
            handle.await.map_err(|e| Error::Download(e.into()))?.map_err(Error::Download)?;
        }
        Ok(())
    }

    async fn post(&self, source: &mut Source) -> Result<(), Error> {
        source.download.status = RunStatus::Post;
        self.db.put_source(source).await.map_err(Error::Db)?;

        if self.uncompress {
            if let Some(data_folder) = source.download.data_folder.clone() {
                tokio::task::spawn_blocking(move || uncompress_folder(&PathBuf::from(data_folder)))
                    .await
                    .map_err(|e| Error::Uncompress(e.into()))?
                    .map_err(Error::Uncompress)?;
            }
        }
        Ok(())
    }

    async fn mark_failed(&self, source: &mut Source, err: &Error) {
        source.download.status = RunStatus::Failed;
        source.download.err = Some(err.to_string());
        source.download.finished_at = Some(chrono::Utc::now());
        let _ = self.db.put_source(source).await;
    }
}

/// Extracts every `.tar.gz`/`.tgz` and `.zip` archive found anywhere
/// under `data_folder`, in place, alongside the original archive.
fn uncompress_folder(data_folder: &std::path::Path) -> anyhow::Result<()> {
    for entry in walkdir::WalkDir::new(data_folder)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
    {
        let path = entry.path();
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        let dest = path.parent().unwrap_or(data_folder);
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            let file = std::fs::File::open(path)?;
            let gz = flate2::read::GzDecoder::new(file);
            tar::Archive::new(gz).unpack(dest)?;
        } else if name.ends_with(".zip") {
            let file = std::fs::File::open(path)?;
            let mut archive = zip::ZipArchive::new(file)?;
            archive.extract(dest)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod uncompress_tests {
    use super::uncompress_folder;
    use std::io::Write;

    #[test]
    fn extracts_tar_gz_archive_in_place() {
        let tmp = tempfile::tempdir().unwrap();
        let archive_path = tmp.path().join("dump.tar.gz");
        {
            let file = std::fs::File::create(&archive_path).unwrap();
            let gz = flate2::write::GzEncoder::new(file, flate2::Compression::default());
            let mut builder = tar::Builder::new(gz);
            let mut header = tar::Header::new_gnu();
            header.set_size(4);
            header.set_cksum();
            builder.append_data(&mut header, "inner.txt", b"hi\n\n".as_slice()).unwrap();
            builder.into_inner().unwrap().finish().unwrap();
        }

        uncompress_folder(tmp.path()).unwrap();

        assert!(tmp.path().join("inner.txt").exists());
    }

    #[test]
    fn extracts_zip_archive_in_place() {
        let tmp = tempfile::tempdir().unwrap();
        let archive_path = tmp.path().join("dump.zip");
        {
            let file = std::fs::File::create(&archive_path).unwrap();
            let mut writer = zip::ZipWriter::new(file);
            writer.start_file("inner.txt", zip::write::FileOptions::default()).unwrap();
            writer.write_all(b"hi\n").unwrap();
            writer.finish().unwrap();
        }

        uncompress_folder(tmp.path()).unwrap();

        assert!(tmp.path().join("inner.txt").exists());
    }
}
