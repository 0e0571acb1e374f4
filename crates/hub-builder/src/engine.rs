//! Cross-source merge into a target collection.

use crate::mapper::MapperRegistry;
use hub_db::HubDb;
use hub_jobs::JobManager;
use hub_models::target::{BuildRecord, BuildStatus};
use hub_models::{Document, DocumentStore, Filter, Mutation, WriteOp};
use hub_plugin::PluginHost;
use rand::Rng;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Semaphore;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no such build config {0:?}")]
    NoSuchConfig(String),
    #[error("source {0:?} resolves to no existing collection")]
    UnresolvedSource(String),
    #[error("build config {0:?} has an invalid root list")]
    InvalidRoot(#[source] anyhow::Error),
    #[error("worker failed")]
    Worker(#[source] anyhow::Error),
    #[error("document store error")]
    Store(#[source] anyhow::Error),
    #[error("hub-db error")]
    Db(#[source] anyhow::Error),
    #[error("an uploader is currently running, deferring build for {0:?}")]
    Busy(String),
}

pub struct Builder {
    store: Arc<dyn DocumentStore>,
    db: HubDb,
    jobs: JobManager,
    mappers: MapperRegistry,
    host: Option<Arc<dyn PluginHost>>,
    merge_concurrency: usize,
}

impl Builder {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        db: HubDb,
        jobs: JobManager,
        mappers: MapperRegistry,
        host: Option<Arc<dyn PluginHost>>,
        merge_concurrency: usize,
    ) -> Self {
        Self {
            store,
            db,
            jobs,
            mappers,
            host,
            merge_concurrency,
        }
    }

    fn no_uploader_running_anywhere(&self) -> hub_jobs::Predicate {
        hub_jobs::Predicate::no_uploader_running_anywhere()
    }

    /// `merge(sources?, target_name?, force?)`.
    pub async fn merge(
        &self,
        config_name: &str,
        sources: Option<Vec<String>>,
        target_name: Option<String>,
        force: bool,
    ) -> Result<BuildRecord, Error> {
        if !force && !self.no_uploader_running_anywhere().check(self.jobs.table()) {
            return Err(Error::Busy(config_name.to_string()));
        }

        // Registered in the live job table for the merge's duration so
        // `Predicate::no_builder_running` (consulted by the uploader) can
        // actually observe this build while it runs.
        let job_id: hub_jobs::JobId = rand::random();
        self.jobs.table().insert(
            job_id,
            hub_jobs::PInfo::new("builder", config_name, "merge"),
        );
        let result = self.merge_inner(config_name, sources, target_name).await;
        match &result {
            Ok(_) => self.jobs.table().mark_done(job_id),
            Err(err) => self.jobs.table().mark_failed(job_id, err.to_string()),
        }
        result
    }

    async fn merge_inner(
        &self,
        config_name: &str,
        sources: Option<Vec<String>>,
        target_name: Option<String>,
    ) -> Result<BuildRecord, Error> {
        let mut config = self
            .db
            .get_build_config(config_name)
            .await
            .map_err(Error::Db)?
            .ok_or_else(|| Error::NoSuchConfig(config_name.to_string()))?;
        config.validate_root().map_err(Error::InvalidRoot)?;

        let existing = self.store.list_collections().await.map_err(Error::Store)?;
        let requested = sources.unwrap_or_else(|| config.sources.clone());
        let resolved = resolve_sources(&requested, &existing)?;
        let (root_sources, non_root_sources) = split_root(&config, &resolved);

        let target = target_name.unwrap_or_else(|| {
            format!("{}_{}_{}", config.name, chrono::Utc::now().timestamp(), random_suffix())
        });
        if existing.contains(&target) {
            self.store.drop(&target).await.map_err(Error::Store)?;
        }
        self.archive_retention(&config, &target, &existing)
            .await?;

        let mut record = BuildRecord::building(target.clone(), "document_store");
        let result = self
            .merge_sources(&config, &root_sources, &non_root_sources, &target, &mut record)
            .await;

        match result {
            Ok(()) => {
                self.finalize(&target).await?;
                self.post_merge().await?;
                record.status = BuildStatus::Success;
            }
            Err(err) => {
                record.status = BuildStatus::Failed;
                record.error = Some(err.to_string());
            }
        }
        record.elapsed_s = Some(
            (chrono::Utc::now() - record.started_at)
                .to_std()
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0),
        );

        config.push_build_record(record.clone());
        self.db.put_build_config(&config).await.map_err(Error::Db)?;
        Ok(record)
    }

    async fn merge_sources(
        &self,
        config: &hub_models::target::BuildConfig,
        root_sources: &[String],
        non_root_sources: &[String],
        target: &str,
        record: &mut BuildRecord,
    ) -> Result<(), Error> {
        for (source_id, is_root) in root_sources
            .iter()
            .map(|s| (s, true))
            .chain(non_root_sources.iter().map(|s| (s, false)))
        {
            let count = self
                .merge_one_source(config, source_id, is_root, target)
                .await?;
            record.src_counts.insert(source_id.clone(), count);
            if let Ok(Some(source)) = self.db.get_source(source_id).await {
                if let Some(release) = source.download.release {
                    record.src_versions.insert(source_id.clone(), release);
                }
            }
        }
        Ok(())
    }

    async fn merge_one_source(
        &self,
        config: &hub_models::target::BuildConfig,
        source_id: &str,
        is_root: bool,
        target: &str,
    ) -> Result<u64, Error> {
        let master = self.db.get_master(source_id).await.map_err(Error::Db)?;
        let mapper_name = master
            .as_ref()
            .and_then(|m| m.get("mapper"))
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let mapper = self.mappers.resolve(mapper_name.as_deref());

        let ids = self.all_ids(source_id, config.scan_batch_size).await?;
        let semaphore = Arc::new(Semaphore::new(self.merge_concurrency.max(1)));
        let mut handles = Vec::new();
        for batch in ids.chunks(config.merge_batch_size.max(1)) {
            let batch = batch.to_vec();
            let store = self.store.clone();
            let mapper = mapper.clone();
            let source_id = source_id.to_string();
            let target = target.to_string();
            let semaphore = semaphore.clone();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore open");
                merge_batch(store.as_ref(), &source_id, &target, &batch, mapper.as_ref(), is_root).await
            }));
        }

        let mut total = 0u64;
        for handle in handles {
            total += handle
                .await
                .map_err(|e| Error::Worker(e.into()))?
                .map_err(Error::Worker)?;
        }
        Ok(total)
    }

    async fn all_ids(&self, collection: &str, scan_batch_size: usize) -> Result<Vec<String>, Error> {
        let page_size = scan_batch_size.max(1);
        let mut ids = Vec::new();
        let mut offset = 0usize;
        loop {
            let page = self
                .store
                .find_ids_page(collection, offset, page_size)
                .await
                .map_err(Error::Store)?;
            let got = page.len();
            ids.extend(page);
            if got < page_size {
                break;
            }
            offset += page_size;
        }
        Ok(ids)
    }

    async fn finalize(&self, target: &str) -> Result<(), Error> {
        if let Some(host) = &self.host {
            match host.call("finalize", serde_json::json!({ "target": target })).await {
                Ok(_) | Err(hub_plugin::HostError::Remote(_, _)) => {}
                Err(other) => return Err(Error::Worker(other.into())),
            }
        }
        Ok(())
    }

    async fn post_merge(&self) -> Result<(), Error> {
        if let Some(host) = &self.host {
            match host.call("post_merge", serde_json::json!({})).await {
                Ok(_) | Err(hub_plugin::HostError::Remote(_, _)) => {}
                Err(other) => return Err(Error::Worker(other.into())),
            }
        }
        Ok(())
    }

    /// Drops archived target collections for `config` beyond
    /// `keep_target_archives`, keeping the most recent ones by build
    /// history order.
    async fn archive_retention(
        &self,
        config: &hub_models::target::BuildConfig,
        new_target: &str,
        existing: &[String],
    ) -> Result<(), Error> {
        let mut archived: Vec<&String> = config
            .build
            .iter()
            .map(|b| &b.target_name)
            .filter(|t| existing.contains(t) && t.as_str() != new_target)
            .collect();
        archived.dedup();
        if archived.len() > config.keep_target_archives {
            for name in &archived[..archived.len() - config.keep_target_archives] {
                self.store.drop(name).await.map_err(Error::Store)?;
            }
        }
        Ok(())
    }

    /// Scans HubDB for build configs flagged `pending_to_build` and
    /// triggers each.
    pub async fn poll_and_build(&self) -> Result<Vec<BuildRecord>, Error> {
        let configs = self.db.list_build_configs().await.map_err(Error::Db)?;
        let mut records = Vec::new();
        for config in configs.into_iter().filter(|c| c.pending_to_build) {
            let record = match self.merge(&config.name, None, None, false).await {
                Ok(record) => record,
                Err(Error::Busy(_)) => {
                    tracing::debug!(config = %config.name, "deferring build: an uploader is running");
                    continue;
                }
                Err(err) => return Err(err),
            };
            if let Some(mut refreshed) = self.db.get_build_config(&config.name).await.map_err(Error::Db)? {
                refreshed.pending_to_build = false;
                self.db.put_build_config(&refreshed).await.map_err(Error::Db)?;
            }
            records.push(record);
        }
        Ok(records)
    }
}

async fn merge_batch(
    store: &dyn DocumentStore,
    source_collection: &str,
    target: &str,
    ids: &[String],
    mapper: &dyn crate::mapper::Mapper,
    is_root: bool,
) -> anyhow::Result<u64> {
    let docs = store
        .find(source_collection, &Filter::by_ids(ids.to_vec()))
        .await?;

    let mapped: Vec<Document> = docs.into_iter().flat_map(|d| mapper.map(d)).collect();
    let mut written = 0u64;

    if is_root {
        let ops = mapped
            .into_iter()
            .filter_map(|doc| {
                hub_models::document::doc_id(&doc).map(|id| WriteOp::ReplaceOne { id, doc })
            })
            .collect::<Vec<_>>();
        written += ops.len() as u64;
        store.bulk_write(target, ops).await?;
    } else {
        for doc in mapped {
            let Some(id) = hub_models::document::doc_id(&doc) else {
                continue;
            };
            let mut fields = BTreeMap::new();
            for (k, v) in doc.iter() {
                if k != "_id" {
                    fields.insert(k.clone(), v.clone());
                }
            }
            let report = store
                .update_one(target, &Filter::by_id(id), &Mutation::Set(fields), false)
                .await?;
            written += report.total_written();
        }
    }
    Ok(written)
}

fn resolve_sources(requested: &[String], existing: &[String]) -> Result<Vec<String>, Error> {
    let mut resolved = Vec::new();
    for entry in requested {
        if existing.contains(entry) {
            resolved.push(entry.clone());
            continue;
        }
        let re = regex::Regex::new(entry).map_err(|e| Error::UnresolvedSource(format!("{entry}: {e}")))?;
        let matches: Vec<String> = existing.iter().filter(|c| re.is_match(c)).cloned().collect();
        if matches.is_empty() {
            return Err(Error::UnresolvedSource(entry.clone()));
        }
        resolved.extend(matches);
    }
    resolved.sort();
    resolved.dedup();
    Ok(resolved)
}

/// Splits `resolved` into (root, non_root) by expanding `config.root`'s
/// negation, if any.
fn split_root(config: &hub_models::target::BuildConfig, resolved: &[String]) -> (Vec<String>, Vec<String>) {
    if config.root.is_empty() {
        return (Vec::new(), resolved.to_vec());
    }
    let negated = config.root[0].negated;
    let named: std::collections::BTreeSet<&str> =
        config.root.iter().map(|r| r.name.as_str()).collect();

    if negated {
        let root: Vec<String> = resolved
            .iter()
            .filter(|s| !named.contains(s.as_str()))
            .cloned()
            .collect();
        let non_root: Vec<String> = resolved
            .iter()
            .filter(|s| named.contains(s.as_str()))
            .cloned()
            .collect();
        (root, non_root)
    } else {
        let root: Vec<String> = resolved
            .iter()
            .filter(|s| named.contains(s.as_str()))
            .cloned()
            .collect();
        let non_root: Vec<String> = resolved
            .iter()
            .filter(|s| !named.contains(s.as_str()))
            .cloned()
            .collect();
        (root, non_root)
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
    use hub_db::InMemoryHubStore;
    use hub_models::target::BuildConfig;
    use serde_json::json;

    async fn seed(store: &dyn DocumentStore, collection: &str, docs: Vec<Document>) {
        store.insert_many(collection, docs).await.unwrap();
    }

    fn doc(id: &str, v: i64) -> Document {
        json!({"_id": id, "v": v}).as_object().unwrap().clone()
    }

    #[tokio::test]
    async fn root_source_upserts_non_root_only_enriches() {
        let store: Arc<dyn DocumentStore> = Arc::new(InMemoryHubStore::new());
        let db = HubDb::new(Arc::new(InMemoryHubStore::new()));

        seed(store.as_ref(), "gene_info", vec![doc("g1", 1), doc("g2", 2)]).await;
        seed(store.as_ref(), "gene_go", vec![doc("g1", 100), doc("g3", 300)]).await;

        let mut config = BuildConfig::new("mygenes");
        config.sources = vec!["gene_info".into(), "gene_go".into()];
        config.root = vec!["gene_info".parse().unwrap()];
        db.put_build_config(&config).await.unwrap();

        let builder = Builder::new(
            store.clone(),
            db.clone(),
            JobManager::new(2, 2),
            MapperRegistry::new(),
            None,
            4,
        );

        let record = builder
            .merge("mygenes", None, Some("mygenes_v1".into()), true)
            .await
            .unwrap();
        assert_eq!(record.status, BuildStatus::Success);

        let g1 = store
            .find_one("mygenes_v1", &Filter::by_id("g1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(g1["v"], json!(1));

        // gene_go enriched g1 but did not create g3 (update-only / non-root).
        assert!(g1.contains_key("v"));
        assert!(store
            .find_one("mygenes_v1", &Filter::by_id("g3"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn unresolvable_source_name_is_an_error() {
        let store: Arc<dyn DocumentStore> = Arc::new(InMemoryHubStore::new());
        let db = HubDb::new(Arc::new(InMemoryHubStore::new()));
        let mut config = BuildConfig::new("mygenes");
        config.sources = vec!["nope".into()];
        db.put_build_config(&config).await.unwrap();

        let builder = Builder::new(store, db, JobManager::new(2, 2), MapperRegistry::new(), None, 4);
        let err = builder.merge("mygenes", None, None, true).await.unwrap_err();
        assert!(matches!(err, Error::UnresolvedSource(_)));
    }

    #[tokio::test]
    async fn archived_targets_beyond_keep_n_are_dropped() {
        let store: Arc<dyn DocumentStore> = Arc::new(InMemoryHubStore::new());
        let db = HubDb::new(Arc::new(InMemoryHubStore::new()));
        seed(store.as_ref(), "gene_info", vec![doc("g1", 1)]).await;

        let mut config = BuildConfig::new("mygenes");
        config.sources = vec!["gene_info".into()];
        config.root = vec!["gene_info".parse().unwrap()];
        config.keep_target_archives = 1;
        db.put_build_config(&config).await.unwrap();

        let builder = Builder::new(store.clone(), db.clone(), JobManager::new(2, 2), MapperRegistry::new(), None, 4);
        builder.merge("mygenes", None, Some("t1".into()), true).await.unwrap();
        builder.merge("mygenes", None, Some("t2".into()), true).await.unwrap();
        builder.merge("mygenes", None, Some("t3".into()), true).await.unwrap();

        let collections = store.list_collections().await.unwrap();
        assert!(!collections.contains(&"t1".to_string()));
        assert!(collections.contains(&"t3".to_string()));
    }

    #[tokio::test]
    async fn merge_defers_while_an_uploader_is_running_anywhere() {
        let store: Arc<dyn DocumentStore> = Arc::new(InMemoryHubStore::new());
        let db = HubDb::new(Arc::new(InMemoryHubStore::new()));
        seed(store.as_ref(), "gene_info", vec![doc("g1", 1)]).await;

        let mut config = BuildConfig::new("mygenes");
        config.sources = vec!["gene_info".into()];
        config.root = vec!["gene_info".parse().unwrap()];
        db.put_build_config(&config).await.unwrap();

        let jobs = JobManager::new(2, 2);
        jobs.table().insert(
            1,
            hub_jobs::PInfo::new("uploader", "other_source", "data"),
        );

        let builder = Builder::new(store, db, jobs, MapperRegistry::new(), None, 4);
        let err = builder
            .merge("mygenes", None, None, false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Busy(_)));
    }

    #[tokio::test]
    async fn a_running_build_is_visible_to_the_uploader_predicate() {
        let store: Arc<dyn DocumentStore> = Arc::new(InMemoryHubStore::new());
        let db = HubDb::new(Arc::new(InMemoryHubStore::new()));
        seed(store.as_ref(), "gene_info", vec![doc("g1", 1)]).await;

        let mut config = BuildConfig::new("mygenes");
        config.sources = vec!["gene_info".into()];
        config.root = vec!["gene_info".parse().unwrap()];
        db.put_build_config(&config).await.unwrap();

        let jobs = JobManager::new(2, 2);
        let builder = Builder::new(store, db, jobs.clone(), MapperRegistry::new(), None, 4);

        assert!(hub_jobs::Predicate::no_builder_running().check(jobs.table()));
        builder.merge("mygenes", None, None, true).await.unwrap();
        // The build has finished and is marked `Done`, so the predicate
        // passes again once `merge` returns.
        assert!(hub_jobs::Predicate::no_builder_running().check(jobs.table()));
        assert!(jobs
            .table()
            .snapshot()
            .iter()
            .any(|s| s.category == "builder" && s.source == "mygenes"));
    }
}
