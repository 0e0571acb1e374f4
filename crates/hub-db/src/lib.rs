//! HubDB: the small persistent key-value-ish store backing the hub.
//!
//! `store` provides the generic collection engine (`find_one`/`find`/
//! `insert_one`/`update_one`/`replace_one`/`remove`/`count`) against
//! either an embedded SQLite file (survives process restart, via
//! `rusqlite`) or an in-memory map for tests. `registry` layers typed
//! accessors for the collections HubDB actually registers: source
//! state, master docs, build configs, plugin registry, generic config,
//! command history, events.

pub mod registry;
pub mod store;

pub use registry::HubDb;
pub use store::{InMemoryHubStore, SqliteHubStore};

/// Names of HubDB's registered collections.
pub mod collections {
    pub const SRC_DUMP: &str = "src_dump";
    pub const SRC_MASTER: &str = "src_master";
    pub const SRC_BUILD: &str = "src_build";
    pub const DATA_PLUGIN: &str = "data_plugin";
    pub const GENERIC_CONFIG: &str = "generic_config";
    pub const COMMAND_HISTORY: &str = "command_history";
    pub const EVENTS: &str = "events";

    pub const ALL: &[&str] = &[
        SRC_DUMP,
        SRC_MASTER,
        SRC_BUILD,
        DATA_PLUGIN,
        GENERIC_CONFIG,
        COMMAND_HISTORY,
        EVENTS,
    ];
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("storage backend error")]
    Backend(#[source] anyhow::Error),
    #[error("document failed to (de)serialize")]
    Serde(#[source] serde_json::Error),
}
