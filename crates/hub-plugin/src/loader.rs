//! Manifest/advanced loading, auto-discovery, and canonical renaming.

use crate::error::Error;
use crate::manifest::{self, Manifest};
use hub_db::HubDb;
use hub_models::PluginRecord;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use url::Url;

use crate::host::{NullPluginHost, PluginHost, StdioPluginHost};

const MANIFEST_JSON: &str = "manifest.json";
const MANIFEST_YAML: &str = "manifest.yaml";

/// The shape a loaded plugin's configuration took, preserved for
/// diagnostics and for choosing how to re-resolve its host.
#[derive(Debug, Clone)]
pub enum PluginConfig {
    Manifest(Manifest),
    /// An importable package: the advanced loader has no manifest to
    /// validate, only a directory naming convention.
    Advanced,
}

/// A fully resolved plugin: its registry record, its parsed
/// configuration, and a bridge through which manifest-declared functions
/// (parser, release, mapping) are invoked.
pub struct LoadedPlugin {
    pub record: PluginRecord,
    pub config: PluginConfig,
    pub host: Arc<dyn PluginHost>,
}

fn has_init_package(dir: &Path) -> bool {
    dir.join("__init__.py").is_file()
}

/// Loads a single plugin directory, choosing the manifest or advanced
/// strategy by folder content.
pub fn load_plugin_dir(dir: &Path, plugin_id: &str) -> Result<LoadedPlugin, Error> {
    let json_path = dir.join(MANIFEST_JSON);
    let yaml_path = dir.join(MANIFEST_YAML);

    if json_path.is_file() || yaml_path.is_file() {
        let path = if json_path.is_file() { json_path } else { yaml_path };
        let bytes = std::fs::read(&path).map_err(Error::Io)?;
        let raw = manifest::parse_raw(&bytes).map_err(Error::Unparseable)?;
        manifest::validate(&raw)?;
        let parsed: Manifest = serde_json::from_value(raw).map_err(|e| Error::Unparseable(e.into()))?;

        let host: Arc<dyn PluginHost> = match entrypoint_script(dir) {
            Some(entrypoint) => Arc::new(StdioPluginHost::new("python3", entrypoint, dir.to_path_buf())),
            None => Arc::new(NullPluginHost),
        };

        let record = PluginRecord::local(plugin_id, dir.display().to_string());
        Ok(LoadedPlugin {
            record,
            config: PluginConfig::Manifest(parsed),
            host,
        })
    } else if has_init_package(dir) {
        let host: Arc<dyn PluginHost> = match entrypoint_script(dir) {
            Some(entrypoint) => Arc::new(StdioPluginHost::new("python3", entrypoint, dir.to_path_buf())),
            None => Arc::new(NullPluginHost),
        };
        Ok(LoadedPlugin {
            record: PluginRecord::local(plugin_id, dir.display().to_string()),
            config: PluginConfig::Advanced,
            host,
        })
    } else {
        Err(Error::NoRecognizablePlugin)
    }
}

fn entrypoint_script(dir: &Path) -> Option<PathBuf> {
    let candidate = dir.join("__init__.py");
    candidate.is_file().then_some(candidate)
}

/// Lists every subdirectory of `plugin_root` not already registered in
/// `db` and registers it with URL `local://<dir>`.
pub async fn discover_plugins(db: &HubDb, plugin_root: &Path) -> Result<Vec<PluginRecord>, Error> {
    let existing = db.list_plugins().await.map_err(Error::Db)?;
    let existing_ids: std::collections::HashSet<String> =
        existing.into_iter().map(|p| p.id).collect();

    let mut newly_registered = Vec::new();
    let entries = std::fs::read_dir(plugin_root).map_err(Error::Io)?;
    for entry in entries {
        let entry = entry.map_err(Error::Io)?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if existing_ids.contains(name) {
            continue;
        }
        if !looks_like_a_plugin(&path) {
            continue;
        }
        let record = PluginRecord::local(name, path.display().to_string());
        db.register_plugin(&record).await.map_err(Error::Db)?;
        tracing::info!(plugin = name, "auto-discovered plugin");
        newly_registered.push(record);
    }
    Ok(newly_registered)
}

fn looks_like_a_plugin(dir: &Path) -> bool {
    dir.join(MANIFEST_JSON).is_file() || dir.join(MANIFEST_YAML).is_file() || has_init_package(dir)
}

/// If a manifest declares a `display_name` (or, more precisely here, a
/// canonical id distinct from the registration id), renames the plugin
/// record and its associated source/state records atomically.
pub async fn canonicalize_name(db: &HubDb, registered_id: &str, declared_name: &str) -> Result<(), Error> {
    if registered_id != declared_name {
        tracing::info!(from = registered_id, to = declared_name, "canonicalizing plugin name");
        db.rename_plugin(registered_id, declared_name)
            .await
            .map_err(Error::Db)?;
    }
    Ok(())
}

/// Resolves a manifest `data_url` entry's protocol from its URL scheme.
pub fn protocol_of(url: &str) -> Option<manifest::Protocol> {
    Url::parse(url)
        .ok()
        .and_then(|u| manifest::Protocol::from_scheme(u.scheme()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hub_db::HubDb;
    use hub_models::store::DocumentStore as _;
    use std::sync::Arc;

    fn db() -> HubDb {
        HubDb::new(Arc::new(hub_db::InMemoryHubStore::new()))
    }

    #[test]
    fn loads_a_valid_manifest_plugin() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(MANIFEST_JSON),
            r#"{"dumper": {"data_url": "https://example.com/d.tsv"}, "uploader": {"parser": "p:load"}}"#,
        )
        .unwrap();
        let loaded = load_plugin_dir(dir.path(), "demo").unwrap();
        assert!(matches!(loaded.config, PluginConfig::Manifest(_)));
    }

    #[test]
    fn rejects_an_invalid_manifest() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(MANIFEST_JSON), r#"{"uploader": {}}"#).unwrap();
        let err = load_plugin_dir(dir.path(), "demo").unwrap_err();
        assert!(matches!(err, Error::Invalid(_)));
    }

    #[test]
    fn empty_directory_is_not_recognizable() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_plugin_dir(dir.path(), "demo").unwrap_err();
        assert!(matches!(err, Error::NoRecognizablePlugin));
    }

    #[tokio::test]
    async fn discovery_registers_new_plugin_directories() {
        let root = tempfile::tempdir().unwrap();
        let plugin_dir = root.path().join("demo");
        std::fs::create_dir(&plugin_dir).unwrap();
        std::fs::write(
            plugin_dir.join(MANIFEST_JSON),
            r#"{"uploader": {"parser": "p:load"}}"#,
        )
        .unwrap();

        let db = db();
        let registered = discover_plugins(&db, root.path()).await.unwrap();
        assert_eq!(registered.len(), 1);
        assert_eq!(registered[0].id, "demo");
        assert!(db.get_plugin("demo").await.unwrap().is_some());

        // Second pass finds nothing new.
        let second = discover_plugins(&db, root.path()).await.unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn canonicalize_name_renames_when_declared_name_differs() {
        let db = db();
        db.register_plugin(&PluginRecord::local("tmp", "/data/tmp"))
            .await
            .unwrap();
        canonicalize_name(&db, "tmp", "demo").await.unwrap();
        assert!(db.get_plugin("tmp").await.unwrap().is_none());
        assert!(db.get_plugin("demo").await.unwrap().is_some());
    }
}
