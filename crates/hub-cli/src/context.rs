//! `HubContext`: the set of shared handles every subcommand needs,
//! constructed once from [`crate::config::HubConfig`] and threaded
//! explicitly through command functions rather than stashed in a
//! global: HubDB, the job manager, and the document store are each
//! singletons for the process.

use crate::config::HubConfig;
use hub_db::{HubDb, SqliteHubStore};
use hub_jobs::JobManager;
use hub_models::DocumentStore;
use hub_plugin::NullPluginHost;
use std::sync::Arc;

pub struct HubContext {
    pub config: HubConfig,
    pub db: HubDb,
    pub jobs: JobManager,
    /// The same abstract `DocumentStore` HubDB's collections live in,
    /// reused here as the source/target/archive collection backend too:
    /// `hub_models::store` only promises the trait, and a second,
    /// separate embedded store would just be more ambient state for a
    /// single-process deployment to keep consistent (`DESIGN.md`).
    pub store: Arc<dyn DocumentStore>,
}

impl HubContext {
    pub fn open(config: HubConfig) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&config.archive_root)?;
        std::fs::create_dir_all(&config.plugin_root)?;

        let sqlite = if config.db_path.as_os_str() == ":memory:" {
            SqliteHubStore::open_in_memory()?
        } else {
            SqliteHubStore::open(&config.db_path)?
        };
        let store: Arc<dyn DocumentStore> = Arc::new(sqlite);

        Ok(Self {
            jobs: JobManager::new(config.max_threads, config.max_processes),
            db: HubDb::new(store.clone()),
            store,
            config,
        })
    }

    /// A plugin host for functions the loaded manifest never needs to
    /// call remotely (dry validation, `discover`/`list`/`register`).
    pub fn null_plugin_host() -> Arc<NullPluginHost> {
        Arc::new(NullPluginHost)
    }
}
