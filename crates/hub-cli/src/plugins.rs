//! Resolves a loaded plugin manifest into the concrete engine pieces the
//! `dump`/`upload` commands need: a [`DumperDriver`] for the declared
//! `data_url` scheme, and per-uploader-entry parser/storage parameters.

use hub_dumper::{DockerDriver, DumperDriver, FtpDriver, GitDriver, HttpDriver, LocalFsDriver};
use hub_plugin::{Manifest, ManifestUploader, Protocol};
use hub_storage::StorageStrategy;
use std::sync::Arc;

pub fn driver_for(manifest: &Manifest) -> anyhow::Result<Arc<dyn DumperDriver>> {
    let dumper = manifest
        .dumper
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("plugin manifest has no `dumper` section"))?;
    let urls = dumper.data_url.as_slice();
    let first = *urls
        .first()
        .ok_or_else(|| anyhow::anyhow!("dumper.data_url is empty"))?;

    let protocol = hub_plugin::protocol_of(first)
        .ok_or_else(|| anyhow::anyhow!("unrecognized data_url scheme: {first:?}"))?;

    Ok(match protocol {
        Protocol::Http => Arc::new(HttpDriver::new(urls.iter().map(|s| s.to_string()).collect())),
        Protocol::Ftp => {
            let url = url::Url::parse(first)?;
            Arc::new(FtpDriver {
                host: url.host_str().unwrap_or_default().to_string(),
                port: url.port().unwrap_or(21),
                paths: urls.iter().map(|s| s.to_string()).collect(),
            })
        }
        Protocol::Git => Arc::new(GitDriver {
            repo_url: first.to_string(),
            pinned_commit: dumper.release.clone(),
        }),
        Protocol::Local => {
            let url = url::Url::parse(first)?;
            Arc::new(LocalFsDriver {
                source_root: url.to_file_path().map_err(|_| anyhow::anyhow!("bad file:// url"))?,
            })
        }
        Protocol::Docker => Arc::new(DockerDriver {
            image: first.trim_start_matches("docker://").to_string(),
        }),
    })
}

/// Finds the manifest's uploader entry by `name`, or its sole entry when
/// unnamed (the manifest's `uploaders` array form).
pub fn uploader_entry<'a>(manifest: &'a Manifest, name: Option<&str>) -> anyhow::Result<&'a ManifestUploader> {
    let entries = manifest.uploader_entries();
    match name {
        Some(name) => entries
            .into_iter()
            .find(|u| u.name.as_deref() == Some(name))
            .ok_or_else(|| anyhow::anyhow!("no uploader entry named {name:?}")),
        None => entries
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("plugin manifest has no uploader entries")),
    }
}

pub fn strategy_for(entry: &ManifestUploader) -> Arc<dyn StorageStrategy> {
    hub_storage::strategy_for(entry.on_duplicates.into())
}
