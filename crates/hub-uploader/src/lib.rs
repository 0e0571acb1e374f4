//! Uploader engine: parser invocation, batched storage, master-document
//! registration.

use hub_db::HubDb;
use hub_jobs::{JobManager, Predicate};
use hub_models::DocumentStore;
use hub_plugin::PluginHost;
use hub_storage::{StorageStrategy, StoreOptions};
use rand::Rng;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Data,
    Post,
    Master,
    Clean,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("source {0:?} has no successful dump")]
    NotReady(String),
    #[error("data folder {0:?} does not exist")]
    MissingDataFolder(String),
    #[error("parser {0:?} returned a non-array result")]
    ParserResult(String),
    #[error("parser invocation failed")]
    Parser(#[source] anyhow::Error),
    #[error("storage strategy error")]
    Storage(#[source] anyhow::Error),
    #[error("document store error")]
    Store(#[source] anyhow::Error),
    #[error("hub-db error")]
    Db(#[source] anyhow::Error),
}

/// One worker's arguments for the `ParallelizedUploader` variant: its
/// `jobs()` returns a list of these, each run as a separate
/// parser+storage pipeline into the same temp collection.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ParserJob {
    pub data_path: String,
    pub kwargs: serde_json::Value,
}

pub struct Uploader {
    pub source_id: String,
    pub sub_source: String,
    pub data_folder: String,
    pub parser_function: String,
    pub parser_kwargs: serde_json::Value,
    pub batch_size: usize,
    pub keep_n: usize,
    store: Arc<dyn DocumentStore>,
    db: HubDb,
    jobs: JobManager,
    host: Arc<dyn PluginHost>,
    strategy: Arc<dyn StorageStrategy>,
}

impl Uploader {
    pub fn new(
        source_id: impl Into<String>,
        sub_source: impl Into<String>,
        data_folder: impl Into<String>,
        parser_function: impl Into<String>,
        parser_kwargs: serde_json::Value,
        batch_size: usize,
        keep_n: usize,
        store: Arc<dyn DocumentStore>,
        db: HubDb,
        jobs: JobManager,
        host: Arc<dyn PluginHost>,
        strategy: Arc<dyn StorageStrategy>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            sub_source: sub_source.into(),
            data_folder: data_folder.into(),
            parser_function: parser_function.into(),
            parser_kwargs,
            batch_size,
            keep_n,
            store,
            db,
            jobs,
            host,
            strategy,
        }
    }

    fn production_collection(&self) -> String {
        self.source_id.clone()
    }

    fn temp_collection(&self) -> String {
        format!("{}_temp_{}", self.source_id, random_suffix())
    }

    fn archive_collection(&self, timestamp: i64) -> String {
        format!("{}_archive_{}_{}", self.source_id, timestamp, random_suffix())
    }

    fn no_dumper_running(&self) -> Predicate {
        Predicate::no_dumper_running(self.source_id.clone())
    }

    fn no_builder_running(&self) -> Predicate {
        Predicate::no_builder_running()
    }

    /// Runs `steps` against this uploader's source, gated by `force`.
    pub async fn load(&self, steps: &[Step], force: bool) -> Result<u64, Error> {
        tracing::info!(source = %self.source_id, ?steps, force, "starting upload");
        if !force {
            let source = self
                .db
                .get_source(&self.source_id)
                .await
                .map_err(Error::Db)?
                .ok_or_else(|| Error::NotReady(self.source_id.clone()))?;
            if !source.has_successful_dump() {
                return Err(Error::NotReady(self.source_id.clone()));
            }
        }
        if !std::path::Path::new(&self.data_folder).exists() {
            return Err(Error::MissingDataFolder(self.data_folder.clone()));
        }

        // Predicates are consulted by the caller's JobManager submission
        // in production; checked here too so a direct call to `load`
        // still refuses to run while a dumper or any builder is active.
        if !self.no_dumper_running().check(self.jobs.table())
            || !self.no_builder_running().check(self.jobs.table())
        {
            return Err(Error::NotReady(format!(
                "{}: dumper or builder currently running",
                self.source_id
            )));
        }

        let temp = self.temp_collection();
        if self.store.list_collections().await.map_err(Error::Store)?.contains(&temp) {
            self.store.drop(&temp).await.map_err(Error::Store)?;
        }

        let mut count = 0u64;
        if steps.contains(&Step::Data) {
            count = self.run_data_step(&temp).await?;
            self.rename_temp_over_production(&temp).await?;
        }
        if steps.contains(&Step::Master) {
            self.write_master(count).await?;
        }
        if steps.contains(&Step::Post) {
            self.run_post_hook().await?;
        }
        if steps.contains(&Step::Clean) {
            self.clean().await?;
        }
        Ok(count)
    }

    /// Runs the parser, then the storage strategy pipeline, in a worker
    /// process. The parser itself is resolved through the plugin host
    /// bridge; the pipeline is IO-light (one process round-trip to
    /// decode, a batched store write) so it runs directly rather than
    /// via `defer_to_process`, which is reserved for CPU-bound work in
    /// this realization.
    async fn run_data_step(&self, temp: &str) -> Result<u64, Error> {
        let args = serde_json::json!({
            "data_path": self.data_folder,
            "kwargs": self.parser_kwargs,
        });
        let result = self
            .host
            .call(&self.parser_function, args)
            .await
            .map_err(|e| Error::Parser(e.into()))?;
        let serde_json::Value::Array(raw_docs) = result else {
            return Err(Error::ParserResult(self.parser_function.clone()));
        };
        let docs: Vec<hub_models::Document> = raw_docs
            .into_iter()
            .filter_map(|v| v.as_object().cloned())
            .collect();

        let opts = StoreOptions {
            batch_size: self.batch_size,
            ..Default::default()
        };
        self.strategy
            .store(self.store.as_ref(), temp, docs, &opts)
            .await
            .map_err(|e| Error::Storage(e.into()))
    }

    /// Runs every job of a `ParallelizedUploader` into the same temp
    /// collection; the rename happens only once every worker succeeds.
    pub async fn load_parallel(&self, jobs: &[ParserJob], force: bool) -> Result<u64, Error> {
        if !force {
            let source = self
                .db
                .get_source(&self.source_id)
                .await
                .map_err(Error::Db)?
                .ok_or_else(|| Error::NotReady(self.source_id.clone()))?;
            if !source.has_successful_dump() {
                return Err(Error::NotReady(self.source_id.clone()));
            }
        }

        let temp = self.temp_collection();
        let mut total = 0u64;
        for job in jobs {
            let args = serde_json::json!({ "data_path": job.data_path, "kwargs": job.kwargs });
            let result = self
                .host
                .call(&self.parser_function, args)
                .await
                .map_err(|e| Error::Parser(e.into()))?;
            let serde_json::Value::Array(raw_docs) = result else {
                return Err(Error::ParserResult(self.parser_function.clone()));
            };
            let docs: Vec<hub_models::Document> = raw_docs
                .into_iter()
                .filter_map(|v| v.as_object().cloned())
                .collect();
            let opts = StoreOptions {
                batch_size: self.batch_size,
                ..Default::default()
            };
            total += self
                .strategy
                .store(self.store.as_ref(), &temp, docs, &opts)
                .await
                .map_err(|e| Error::Storage(e.into()))?;
        }
        self.rename_temp_over_production(&temp).await?;
        Ok(total)
    }

    /// Renames temp over the source's production collection, archiving
    /// the displaced collection; only the most recent `keep_n` archives
    /// are kept.
    async fn rename_temp_over_production(&self, temp: &str) -> Result<(), Error> {
        let production = self.production_collection();
        let existing = self.store.list_collections().await.map_err(Error::Store)?;
        if existing.contains(&production) {
            let archive = self.archive_collection(chrono::Utc::now().timestamp());
            self.store
                .rename(&production, &archive, true)
                .await
                .map_err(Error::Store)?;
        }
        self.store
            .rename(temp, &production, true)
            .await
            .map_err(Error::Store)
    }

    async fn write_master(&self, count: u64) -> Result<(), Error> {
        let mut doc = self
            .db
            .get_master(&self.source_id)
            .await
            .map_err(Error::Db)?
            .unwrap_or_default();
        doc.insert(
            "name".into(),
            serde_json::Value::String(self.source_id.clone()),
        );
        doc.insert(
            "timestamp".into(),
            serde_json::Value::String(chrono::Utc::now().to_rfc3339()),
        );
        doc.insert("count".into(), serde_json::json!(count));
        self.db
            .put_master(&self.source_id, doc)
            .await
            .map_err(Error::Db)
    }

    async fn run_post_hook(&self) -> Result<(), Error> {
        let hook = format!("{}_post_update_data", self.parser_function);
        match self.host.call(&hook, serde_json::json!({})).await {
            Ok(_) => Ok(()),
            Err(hub_plugin::HostError::Remote(_, _)) => Ok(()), // hook not defined: a no-op
            Err(other) => Err(Error::Parser(other.into())),
        }
    }

    /// Drops archived/temp collections for this source beyond the
    /// `keep_n` bound.
    async fn clean(&self) -> Result<(), Error> {
        let collections = self.store.list_collections().await.map_err(Error::Store)?;
        let prefix_temp = format!("{}_temp_", self.source_id);
        let prefix_archive = format!("{}_archive_", self.source_id);

        for name in collections.iter().filter(|c| c.starts_with(&prefix_temp)) {
            self.store.drop(name).await.map_err(Error::Store)?;
        }

        let mut archives: Vec<&String> = collections
            .iter()
            .filter(|c| c.starts_with(&prefix_archive))
            .collect();
        archives.sort();
        if archives.len() > self.keep_n {
            for name in &archives[..archives.len() - self.keep_n] {
                self.store.drop(name).await.map_err(Error::Store)?;
            }
        }
        Ok(())
    }
}

fn random_suffix() -> String {
    let mut rng = rand::thread_rng();
    (0..8)
        .map(|_| rng.sample(rand::distributions::Alphanumeric) as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use hub_db::InMemoryHubStore;
    use hub_jobs::JobManager;
    use hub_models::Source;

    struct FakeHost;

    #[async_trait]
    impl PluginHost for FakeHost {
        async fn call(&self, function: &str, _args: serde_json::Value) -> Result<serde_json::Value, hub_plugin::HostError> {
            if function == "parser:load" {
                Ok(serde_json::json!([{"_id": "1", "v": 1}, {"_id": "2", "v": 2}]))
            } else {
                Err(hub_plugin::HostError::Remote(function.to_string(), "undefined".to_string()))
            }
        }
    }

    async fn ready_source(db: &HubDb, id: &str) {
        let mut source = Source::new(id);
        source.download.status = hub_models::source::RunStatus::Success;
        source.download.data_folder = Some("/tmp".to_string());
        db.put_source(&source).await.unwrap();
    }

    #[tokio::test]
    async fn load_stores_parsed_documents_and_writes_master() {
        let tmp = tempfile::tempdir().unwrap();
        let db = HubDb::new(Arc::new(InMemoryHubStore::new()));
        ready_source(&db, "demo").await;

        let store: Arc<dyn DocumentStore> = Arc::new(InMemoryHubStore::new());
        let uploader = Uploader::new(
            "demo",
            "demo",
            tmp.path().display().to_string(),
            "parser:load",
            serde_json::json!({}),
            100,
            10,
            store.clone(),
            db,
            JobManager::new(2, 2),
            Arc::new(FakeHost),
            Arc::new(hub_storage::Basic),
        );

        let count = uploader
            .load(&[Step::Data, Step::Master], false)
            .await
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(
            store.count("demo", &hub_models::Filter::all()).await.unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn load_fails_without_successful_dump_unless_forced() {
        let tmp = tempfile::tempdir().unwrap();
        let db = HubDb::new(Arc::new(InMemoryHubStore::new()));
        let store: Arc<dyn DocumentStore> = Arc::new(InMemoryHubStore::new());
        let uploader = Uploader::new(
            "demo",
            "demo",
            tmp.path().display().to_string(),
            "parser:load",
            serde_json::json!({}),
            100,
            10,
            store,
            db,
            JobManager::new(2, 2),
            Arc::new(FakeHost),
            Arc::new(hub_storage::Basic),
        );
        let err = uploader.load(&[Step::Data], false).await.unwrap_err();
        assert!(matches!(err, Error::NotReady(_)));
    }
}
