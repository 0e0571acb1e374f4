//! Protocol drivers: one implementation per transport, each deciding
//! whether a remote entry is newer than what is already on disk and
//! knowing how to fetch it.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// One `(remote, local)` pair the checker decided needs a transfer
/// decision.
#[derive(Debug, Clone)]
pub struct DownloadItem {
    pub remote: String,
    pub local: PathBuf,
}

#[async_trait]
pub trait DumperDriver: Send + Sync {
    /// The items this driver would fetch into `data_folder`.
    fn plan(&self, data_folder: &Path) -> anyhow::Result<Vec<DownloadItem>>;

    /// Whether `item.remote` is newer than whatever already exists at
    /// `item.local`. Default policies: HTTP uses Last-Modified, FTP uses
    /// MDTM+SIZE, git uses HEAD/pinned commit, local filesystem uses
    /// mtime, and "remote-always-better" is the fallback used by
    /// container-image sources.
    async fn remote_is_better(&self, item: &DownloadItem) -> anyhow::Result<bool>;

    /// Fetches a single item into place.
    async fn fetch(&self, item: &DownloadItem) -> anyhow::Result<()>;

    /// A stable release identifier derived from the remote origin.
    /// Called once per `check`.
    async fn detect_release(&self) -> anyhow::Result<String>;
}

/// HTTP/HTTPS driver: compares `Last-Modified` headers.
pub struct HttpDriver {
    pub client: reqwest::Client,
    pub urls: Vec<String>,
}

impl HttpDriver {
    pub fn new(urls: Vec<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(600))
                .build()
                .expect("reqwest client builds"),
            urls,
        }
    }

    fn filename_of(url: &str) -> String {
        url.rsplit('/').next().unwrap_or("download").to_string()
    }
}

#[async_trait]
impl DumperDriver for HttpDriver {
    fn plan(&self, data_folder: &Path) -> anyhow::Result<Vec<DownloadItem>> {
        Ok(self
            .urls
            .iter()
            .map(|u| DownloadItem {
                remote: u.clone(),
                local: data_folder.join(Self::filename_of(u)),
            })
            .collect())
    }

    async fn remote_is_better(&self, item: &DownloadItem) -> anyhow::Result<bool> {
        if !item.local.exists() {
            return Ok(true);
        }
        let resp = self.client.head(&item.remote).send().await?;
        let Some(remote_modified) = resp
            .headers()
            .get(reqwest::header::LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| httpdate::parse_http_date(v).ok())
        else {
            return Ok(true);
        };
        let local_modified = std::fs::metadata(&item.local)?.modified()?;
        Ok(remote_modified > local_modified)
    }

    async fn fetch(&self, item: &DownloadItem) -> anyhow::Result<()> {
        let bytes = self.client.get(&item.remote).send().await?.bytes().await?;
        if let Some(parent) = item.local.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&item.local, &bytes)?;
        Ok(())
    }

    async fn detect_release(&self) -> anyhow::Result<String> {
        let first = self
            .urls
            .first()
            .ok_or_else(|| anyhow::anyhow!("no data_url configured"))?;
        let resp = self.client.head(first).send().await?;
        let release = resp
            .headers()
            .get(reqwest::header::LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or_else(|| chrono::Utc::now().format("%Y%m%d").to_string());
        Ok(release.replace([' ', ':', ','], "_"))
    }
}

/// FTP driver: compares `MDTM`/`SIZE`.
pub struct FtpDriver {
    pub host: String,
    pub port: u16,
    pub paths: Vec<String>,
}

#[async_trait]
impl DumperDriver for FtpDriver {
    fn plan(&self, data_folder: &Path) -> anyhow::Result<Vec<DownloadItem>> {
        Ok(self
            .paths
            .iter()
            .map(|p| DownloadItem {
                remote: p.clone(),
                local: data_folder.join(p.rsplit('/').next().unwrap_or(p)),
            })
            .collect())
    }

    async fn remote_is_better(&self, item: &DownloadItem) -> anyhow::Result<bool> {
        if !item.local.exists() {
            return Ok(true);
        }
        let mut client = suppaftp::AsyncFtpStream::connect((self.host.as_str(), self.port)).await?;
        client.login("anonymous", "anonymous@").await?;
        let remote_size = client.size(&item.remote).await.ok();
        let _ = client.quit().await;
        let local_size = std::fs::metadata(&item.local)?.len() as usize;
        Ok(remote_size.map(|s| s != local_size).unwrap_or(true))
    }

    async fn fetch(&self, item: &DownloadItem) -> anyhow::Result<()> {
        let mut client = suppaftp::AsyncFtpStream::connect((self.host.as_str(), self.port)).await?;
        client.login("anonymous", "anonymous@").await?;
        let mut reader = client.retr_as_stream(&item.remote).await?;
        if let Some(parent) = item.local.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = tokio::fs::File::create(&item.local).await?;
        tokio::io::copy(&mut reader, &mut file).await?;
        client.finalize_retr_stream(reader).await?;
        let _ = client.quit().await;
        Ok(())
    }

    async fn detect_release(&self) -> anyhow::Result<String> {
        Ok(chrono::Utc::now().format("%Y%m%d").to_string())
    }
}

/// Git driver: compares `HEAD` against a pinned commit.
pub struct GitDriver {
    pub repo_url: String,
    pub pinned_commit: Option<String>,
}

#[async_trait]
impl DumperDriver for GitDriver {
    fn plan(&self, data_folder: &Path) -> anyhow::Result<Vec<DownloadItem>> {
        Ok(vec![DownloadItem {
            remote: self.repo_url.clone(),
            local: data_folder.to_path_buf(),
        }])
    }

    async fn remote_is_better(&self, item: &DownloadItem) -> anyhow::Result<bool> {
        let url = self.repo_url.clone();
        let local = item.local.clone();
        tokio::task::spawn_blocking(move || -> anyhow::Result<bool> {
            if !local.join(".git").exists() {
                return Ok(true);
            }
            let repo = git2::Repository::open(&local)?;
            let local_head = repo.head()?.peel_to_commit()?.id();
            let mut remote = repo.find_remote("origin").or_else(|_| repo.remote_anonymous(&url))?;
            remote.connect(git2::Direction::Fetch)?;
            let remote_head = remote
                .list()?
                .iter()
                .find(|h| h.name() == "HEAD")
                .map(|h| h.oid())
                .ok_or_else(|| anyhow::anyhow!("remote has no HEAD"))?;
            Ok(remote_head != local_head)
        })
        .await?
    }

    async fn fetch(&self, item: &DownloadItem) -> anyhow::Result<()> {
        let url = self.repo_url.clone();
        let local = item.local.clone();
        let pinned = self.pinned_commit.clone();
        tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            std::fs::create_dir_all(&local)?;
            let repo = if local.join(".git").exists() {
                git2::Repository::open(&local)?
            } else {
                git2::Repository::clone(&url, &local)?
            };
            let mut remote = repo.find_remote("origin").or_else(|_| repo.remote_anonymous(&url))?;
            remote.fetch(&["HEAD"], None, None)?;
            let target = match &pinned {
                Some(commit) => repo.revparse_single(commit)?,
                None => repo.find_reference("FETCH_HEAD")?.peel(git2::ObjectType::Commit)?,
            };
            repo.checkout_tree(&target, None)?;
            repo.set_head_detached(target.id())?;
            Ok(())
        })
        .await?
    }

    async fn detect_release(&self) -> anyhow::Result<String> {
        Ok(self
            .pinned_commit
            .clone()
            .unwrap_or_else(|| "HEAD".to_string()))
    }
}

/// Local filesystem driver: compares mtimes; uses `walkdir` to enumerate
/// archive members for a source whose "remote" is another path on disk.
pub struct LocalFsDriver {
    pub source_root: PathBuf,
}

#[async_trait]
impl DumperDriver for LocalFsDriver {
    fn plan(&self, data_folder: &Path) -> anyhow::Result<Vec<DownloadItem>> {
        let mut items = Vec::new();
        for entry in walkdir::WalkDir::new(&self.source_root)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
        {
            let rel = entry.path().strip_prefix(&self.source_root)?;
            items.push(DownloadItem {
                remote: entry.path().display().to_string(),
                local: data_folder.join(rel),
            });
        }
        Ok(items)
    }

    async fn remote_is_better(&self, item: &DownloadItem) -> anyhow::Result<bool> {
        if !item.local.exists() {
            return Ok(true);
        }
        let remote_modified = std::fs::metadata(&item.remote)?.modified()?;
        let local_modified = std::fs::metadata(&item.local)?.modified()?;
        Ok(remote_modified > local_modified)
    }

    async fn fetch(&self, item: &DownloadItem) -> anyhow::Result<()> {
        if let Some(parent) = item.local.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(&item.remote, &item.local)?;
        Ok(())
    }

    async fn detect_release(&self) -> anyhow::Result<String> {
        let modified = std::fs::metadata(&self.source_root)?.modified()?;
        let datetime: chrono::DateTime<chrono::Utc> = modified.into();
        Ok(datetime.format("%Y%m%d%H%M%S").to_string())
    }
}

/// Container-image driver: "remote-always-better" fallback, `docker
/// pull` shelled out the same way `agent::jobs::run` invokes connectors.
pub struct DockerDriver {
    pub image: String,
}

#[async_trait]
impl DumperDriver for DockerDriver {
    fn plan(&self, data_folder: &Path) -> anyhow::Result<Vec<DownloadItem>> {
        Ok(vec![DownloadItem {
            remote: self.image.clone(),
            local: data_folder.join("image.tar"),
        }])
    }

    async fn remote_is_better(&self, _item: &DownloadItem) -> anyhow::Result<bool> {
        Ok(true)
    }

    async fn fetch(&self, item: &DownloadItem) -> anyhow::Result<()> {
        let output = tokio::process::Command::new("docker")
            .args(["pull", &self.image])
            .output()
            .await?;
        if !output.status.success() {
            anyhow::bail!(
                "docker pull {} failed: {}",
                self.image,
                String::from_utf8_lossy(&output.stderr)
            );
        }
        if let Some(parent) = item.local.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let save = tokio::process::Command::new("docker")
            .args(["save", "-o"])
            .arg(&item.local)
            .arg(&self.image)
            .output()
            .await?;
        if !save.status.success() {
            anyhow::bail!(
                "docker save {} failed: {}",
                self.image,
                String::from_utf8_lossy(&save.stderr)
            );
        }
        Ok(())
    }

    async fn detect_release(&self) -> anyhow::Result<String> {
        Ok(self.image.clone())
    }
}
