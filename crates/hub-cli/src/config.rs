//! Process configuration: CLI flags, `HUB_`-prefixed environment
//! overrides, and an optional YAML config file, merged in that priority
//! order -- an explicit flag or environment variable always wins over
//! the file, and the file always wins over the hardcoded default.

use clap::Args;
use std::path::PathBuf;

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct ConfigFile {
    db_path: Option<PathBuf>,
    archive_root: Option<PathBuf>,
    plugin_root: Option<PathBuf>,
    max_threads: Option<usize>,
    max_processes: Option<usize>,
}

fn load_config_file(path: &std::path::Path) -> anyhow::Result<ConfigFile> {
    let bytes = std::fs::read(path)
        .map_err(|e| anyhow::anyhow!("reading config file {}: {e}", path.display()))?;
    Ok(serde_yaml::from_slice(&bytes)?)
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    /// Path to a YAML config file providing defaults for the flags below.
    #[clap(long = "config", env = "HUB_CONFIG")]
    config_file: Option<PathBuf>,

    /// Path to HubDB's embedded SQLite file.
    #[clap(long = "db-path", env = "HUB_DB_PATH")]
    db_path: Option<PathBuf>,

    /// Root directory under which dumper archives/data folders are kept.
    #[clap(long = "archive-root", env = "HUB_ARCHIVE_ROOT")]
    archive_root: Option<PathBuf>,

    /// Root directory plugins are discovered from.
    #[clap(long = "plugin-root", env = "HUB_PLUGIN_ROOT")]
    plugin_root: Option<PathBuf>,

    /// Worker-thread pool size for `JobManager::defer_to_thread`.
    #[clap(long = "max-threads", env = "HUB_MAX_THREADS")]
    max_threads: Option<usize>,

    /// Worker-process pool size for `JobManager::defer_to_process`.
    #[clap(long = "max-processes", env = "HUB_MAX_PROCESSES")]
    max_processes: Option<usize>,
}

/// The fully resolved configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    pub db_path: PathBuf,
    pub archive_root: PathBuf,
    pub plugin_root: PathBuf,
    pub max_threads: usize,
    pub max_processes: usize,
}

impl ConfigArgs {
    pub fn resolve(self) -> anyhow::Result<HubConfig> {
        let file = match &self.config_file {
            Some(path) => load_config_file(path)?,
            None => ConfigFile::default(),
        };
        Ok(HubConfig {
            db_path: self
                .db_path
                .or(file.db_path)
                .unwrap_or_else(|| PathBuf::from("hubdb.sqlite3")),
            archive_root: self
                .archive_root
                .or(file.archive_root)
                .unwrap_or_else(|| PathBuf::from("archive")),
            plugin_root: self
                .plugin_root
                .or(file.plugin_root)
                .unwrap_or_else(|| PathBuf::from("plugins")),
            max_threads: self.max_threads.or(file.max_threads).unwrap_or(4),
            max_processes: self.max_processes.or(file.max_processes).unwrap_or(4),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(config_file: Option<PathBuf>, db_path: Option<PathBuf>) -> ConfigArgs {
        ConfigArgs {
            config_file,
            db_path,
            archive_root: None,
            plugin_root: None,
            max_threads: None,
            max_processes: None,
        }
    }

    #[test]
    fn flag_wins_over_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hub.yaml");
        std::fs::write(&path, "db_path: from-file.sqlite3\nmax_threads: 8\n").unwrap();

        let resolved = args(Some(path), Some(PathBuf::from("from-flag.sqlite3")))
            .resolve()
            .unwrap();

        assert_eq!(resolved.db_path, PathBuf::from("from-flag.sqlite3"));
        assert_eq!(resolved.max_threads, 8);
    }

    #[test]
    fn falls_back_to_hardcoded_default_without_a_file_or_flag() {
        let resolved = args(None, None).resolve().unwrap();
        assert_eq!(resolved.db_path, PathBuf::from("hubdb.sqlite3"));
        assert_eq!(resolved.max_threads, 4);
    }
}
