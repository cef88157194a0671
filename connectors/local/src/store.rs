use crate::config::LocalStoreConfig;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use ratingsync_core::{
    connector::{ArtifactSnapshot, ArtifactStore, ConnectorConfig},
    extract::content_digest,
    Error, Result,
};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

/// Artifact store rooted at a local directory. Keys map to relative paths and
/// revisions are SHA-256 digests of the file content.
#[derive(Debug, Clone)]
pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    pub fn new(config: ConnectorConfig) -> Result<Self> {
        let config = LocalStoreConfig::from_json(config.properties_json())?;
        Ok(Self::with_root(config.root))
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if key.is_empty() || escapes {
            return Err(Error::Storage(format!(
                "key {:?} must be a relative path inside the store root",
                key
            )));
        }
        Ok(self.root.join(relative))
    }

    /// Hidden, uniquely named path next to `path`.
    fn sibling(path: &Path, suffix: &str) -> PathBuf {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        path.with_file_name(format!(".{}.{}.{}", name, Uuid::new_v4().simple(), suffix))
    }

    async fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await?;
        file.write_all(bytes).await?;
        file.sync_all().await
    }

    async fn discard(path: &Path) {
        if let Err(e) = fs::remove_file(path).await {
            warn!(path = %path.display(), error = %e, "Failed to remove staging file");
        }
    }

    async fn ensure_parent(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    fn describe(&self, key: &str) -> String {
        self.root.join(key).display().to_string()
    }

    async fn stat(&self, key: &str) -> Result<Option<u64>> {
        let path = self.path(key)?;
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(Some(meta.len())),
            Ok(_) => Err(Error::Storage(format!(
                "{} exists but is not a regular file",
                path.display()
            ))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn read(&self, key: &str) -> Result<Option<ArtifactSnapshot>> {
        let path = self.path(key)?;
        let data = match fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let modified_at = fs::metadata(&path)
            .await
            .ok()
            .and_then(|meta| meta.modified().ok())
            .map(DateTime::<Utc>::from);

        Ok(Some(ArtifactSnapshot {
            key: key.to_string(),
            revision: content_digest(&data),
            bytes: Bytes::from(data),
            modified_at,
        }))
    }

    /// The content is written and synced under a staging name first, then
    /// hard-linked into place, so readers never see a partial file.
    async fn create_exclusive(&self, key: &str, bytes: Bytes) -> Result<Option<String>> {
        let path = self.path(key)?;
        Self::ensure_parent(&path).await?;

        let staging = Self::sibling(&path, "tmp");
        if let Err(e) = Self::write_synced(&staging, &bytes).await {
            Self::discard(&staging).await;
            return Err(e.into());
        }
        let linked = fs::hard_link(&staging, &path).await;
        Self::discard(&staging).await;

        match linked {
            Ok(()) => {
                debug!(path = %path.display(), bytes = bytes.len(), "Created");
                Ok(Some(content_digest(&bytes)))
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// The file is renamed aside, checked, and then either removed or linked
    /// back. While it is aside the key reads as absent.
    async fn delete_if_match(&self, key: &str, revision: &str) -> Result<bool> {
        let path = self.path(key)?;
        let aside = Self::sibling(&path, "retiring");
        match fs::rename(&path, &aside).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        }

        let unchanged = match fs::read(&aside).await {
            Ok(data) => content_digest(&data) == revision,
            Err(e) => {
                warn!(path = %aside.display(), error = %e, "Cannot read file moved aside");
                false
            }
        };
        if unchanged {
            fs::remove_file(&aside).await?;
            return Ok(true);
        }

        match fs::hard_link(&aside, &path).await {
            Ok(()) => {
                Self::discard(&aside).await;
                Ok(false)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(Error::Storage(format!(
                "{} was recreated while being checked; previous content kept at {}",
                path.display(),
                aside.display()
            ))),
            Err(e) => Err(e.into()),
        }
    }
}
