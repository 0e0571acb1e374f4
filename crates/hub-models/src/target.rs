//! The build configuration and target-collection history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single entry naming sources to merge, optionally prefixed with `!`
/// to negate it out of the root set. Mixing prefixed and un-prefixed
/// entries is an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootEntry {
    pub name: String,
    pub negated: bool,
}

impl std::str::FromStr for RootEntry {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.strip_prefix('!') {
            Some(rest) => Ok(RootEntry {
                name: rest.to_string(),
                negated: true,
            }),
            None => Ok(RootEntry {
                name: s.to_string(),
                negated: false,
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    pub name: String,
    /// Source collection names; a name may be a plain collection name or a
    /// regex matched against existing collections.
    pub sources: Vec<String>,
    pub root: Vec<RootEntry>,
    pub cold_collection: Option<String>,
    /// Read-side paging size, independent of `merge_batch_size`.
    #[serde(default = "default_scan_batch_size")]
    pub scan_batch_size: usize,
    #[serde(default = "default_merge_batch_size")]
    pub merge_batch_size: usize,
    /// How many `build` history entries to retain; oldest dropped first.
    #[serde(default = "default_build_history_len")]
    pub keep_build_history: usize,
    /// How many archived target collections to retain.
    #[serde(default = "default_keep_n")]
    pub keep_target_archives: usize,
    /// Whether this config is flagged to be built on the builder's next
    /// poll tick.
    #[serde(default)]
    pub pending_to_build: bool,
    #[serde(default)]
    pub build: Vec<BuildRecord>,
}

fn default_scan_batch_size() -> usize {
    10_000
}
fn default_merge_batch_size() -> usize {
    1_000
}
fn default_build_history_len() -> usize {
    25
}
fn default_keep_n() -> usize {
    10
}

impl BuildConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sources: Vec::new(),
            root: Vec::new(),
            cold_collection: None,
            scan_batch_size: default_scan_batch_size(),
            merge_batch_size: default_merge_batch_size(),
            keep_build_history: default_build_history_len(),
            keep_target_archives: default_keep_n(),
            pending_to_build: false,
            build: Vec::new(),
        }
    }

    /// Validates the root list: mixed negated/un-negated entries are an
    /// error.
    pub fn validate_root(&self) -> anyhow::Result<()> {
        if self.root.is_empty() {
            return Ok(());
        }
        let negated = self.root[0].negated;
        if self.root.iter().any(|r| r.negated != negated) {
            anyhow::bail!(
                "build config {:?}: root entries mix `!`-prefixed and un-prefixed names",
                self.name
            );
        }
        Ok(())
    }

    /// Appends a build record, dropping the oldest entries beyond
    /// `keep_build_history`.
    pub fn push_build_record(&mut self, record: BuildRecord) {
        self.build.push(record);
        while self.build.len() > self.keep_build_history {
            self.build.remove(0);
        }
    }

    pub fn last_successful_build(&self) -> Option<&BuildRecord> {
        self.build
            .iter()
            .rev()
            .find(|b| b.status == BuildStatus::Success)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    Building,
    Success,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildRecord {
    pub target_name: String,
    pub status: BuildStatus,
    pub started_at: DateTime<Utc>,
    pub step_started_at: DateTime<Utc>,
    pub elapsed_s: Option<f64>,
    pub src_counts: std::collections::BTreeMap<String, u64>,
    pub src_versions: std::collections::BTreeMap<String, String>,
    pub target_backend: String,
    pub logfile: Option<String>,
    pub error: Option<String>,
    /// `stats` and `build_version` propagated into the search-index
    /// mapping's `_meta` field.
    pub stats: serde_json::Value,
    pub build_version: String,
}

impl BuildRecord {
    pub fn building(target_name: impl Into<String>, target_backend: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            target_name: target_name.into(),
            status: BuildStatus::Building,
            started_at: now,
            step_started_at: now,
            elapsed_s: None,
            src_counts: Default::default(),
            src_versions: Default::default(),
            target_backend: target_backend.into(),
            logfile: None,
            error: None,
            stats: serde_json::json!({}),
            build_version: uuid_like_version(now),
        }
    }
}

/// A readable, monotonic build-version stamp. Real UUID generation lives
/// in `hub-jobs`/`hub-builder` call sites where randomness is available;
/// this is just a deterministic fallback used in doctests/unit tests.
fn uuid_like_version(at: DateTime<Utc>) -> String {
    at.format("%Y%m%d%H%M%S%.f").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_entries_parse_negation() {
        let e: RootEntry = "!foo".parse().unwrap();
        assert!(e.negated);
        assert_eq!(e.name, "foo");
    }

    #[test]
    fn mixed_root_negation_is_rejected() {
        let mut cfg = BuildConfig::new("demo");
        cfg.root = vec!["a".parse().unwrap(), "!b".parse().unwrap()];
        assert!(cfg.validate_root().is_err());
    }

    #[test]
    fn build_history_capped() {
        let mut cfg = BuildConfig::new("demo");
        cfg.keep_build_history = 2;
        for _ in 0..5 {
            cfg.push_build_record(BuildRecord::building("t", "sqlite"));
        }
        assert_eq!(cfg.build.len(), 2);
    }
}
