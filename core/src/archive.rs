use crate::connector::{ArchivedArtifact, ArtifactSnapshot, ArtifactStore};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};

const ARCHIVE_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Moves processed artifacts under the archive prefix.
///
/// The archived copy is written from the snapshot that was extracted, then
/// the source is deleted only if it still holds that same revision. Rows
/// appended after extraction therefore stay under the source key. If the
/// process dies between the two steps the artifact exists in both places,
/// and the next run processes it again.
pub struct Archiver {
    store: Arc<dyn ArtifactStore>,
    prefix: String,
}

impl Archiver {
    pub fn new(store: Arc<dyn ArtifactStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into().trim_end_matches('/').to_string(),
        }
    }

    pub async fn archive(&self, snapshot: &ArtifactSnapshot) -> Result<ArchivedArtifact> {
        self.archive_at(snapshot, Utc::now()).await
    }

    pub async fn archive_at(
        &self,
        snapshot: &ArtifactSnapshot,
        now: DateTime<Utc>,
    ) -> Result<ArchivedArtifact> {
        let archive_key = self.write_copy(snapshot, now).await?;

        let deleted = self
            .store
            .delete_if_match(&snapshot.key, &snapshot.revision)
            .await
            .map_err(|e| {
                warn!(
                    key = %snapshot.key,
                    archive_key = %archive_key,
                    "Artifact copied to archive but not deleted; it will be processed again"
                );
                Error::Archive(format!(
                    "delete of {} failed after copy: {}",
                    snapshot.key, e
                ))
            })?;
        if !deleted {
            warn!(
                key = %snapshot.key,
                archive_key = %archive_key,
                "Artifact changed after extraction; leaving it in place"
            );
            return Err(Error::Archive(format!(
                "{} changed since revision {} was read; processed rows are in {}",
                snapshot.key, snapshot.revision, archive_key
            )));
        }

        info!(
            from = %self.store.describe(&snapshot.key),
            to = %self.store.describe(&archive_key),
            "Artifact archived"
        );
        Ok(ArchivedArtifact {
            source_key: snapshot.key.clone(),
            archive_key,
        })
    }

    /// Writes the snapshot under the first free archive key for `now`. Two
    /// runs inside the same second get `_1`, `_2`, ... appended to the
    /// timestamp.
    async fn write_copy(&self, snapshot: &ArtifactSnapshot, now: DateTime<Utc>) -> Result<String> {
        let file_name = snapshot.file_name();
        let stamp = now.format(ARCHIVE_TIMESTAMP_FORMAT);
        let mut candidate = archive_key(&self.prefix, file_name, now);
        let mut n = 0;
        loop {
            let created = self
                .store
                .create_exclusive(&candidate, snapshot.bytes.clone())
                .await
                .map_err(|e| Error::Archive(format!("copy to {} failed: {}", candidate, e)))?;
            if created.is_some() {
                return Ok(candidate);
            }
            n += 1;
            candidate = format!("{}/{}_{}_{}", self.prefix, stamp, n, file_name);
        }
    }
}

/// `<prefix>/<YYYYMMDD_HHMMSS>_<name>`
pub fn archive_key(prefix: &str, file_name: &str, now: DateTime<Utc>) -> String {
    format!(
        "{}/{}_{}",
        prefix.trim_end_matches('/'),
        now.format(ARCHIVE_TIMESTAMP_FORMAT),
        file_name
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryArtifactStore;
    use chrono::TimeZone;

    const KEY: &str = "novas_avaliacoes.csv";

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 21, 12, 30, 5).unwrap()
    }

    async fn snapshot(store: &MemoryArtifactStore) -> ArtifactSnapshot {
        store.read(KEY).await.unwrap().unwrap()
    }

    #[test]
    fn test_archive_key_format() {
        assert_eq!(
            archive_key("archived", KEY, noon()),
            "archived/20250121_123005_novas_avaliacoes.csv"
        );
        assert_eq!(
            archive_key("archived/", KEY, noon()),
            "archived/20250121_123005_novas_avaliacoes.csv"
        );
    }

    #[tokio::test]
    async fn test_archive_moves_artifact() {
        let store = Arc::new(MemoryArtifactStore::new());
        store.insert(KEY, "data");
        let archiver = Archiver::new(store.clone(), "archived");

        let archived = archiver
            .archive_at(&snapshot(&store).await, noon())
            .await
            .unwrap();
        assert_eq!(
            archived.archive_key,
            "archived/20250121_123005_novas_avaliacoes.csv"
        );
        assert!(store.get(KEY).is_none());
        assert_eq!(store.get(&archived.archive_key).unwrap(), "data");
    }

    #[tokio::test]
    async fn test_same_second_does_not_overwrite() {
        let store = Arc::new(MemoryArtifactStore::new());
        store.insert("archived/20250121_123005_novas_avaliacoes.csv", "first");
        store.insert(KEY, "second");
        let archiver = Archiver::new(store.clone(), "archived");

        let archived = archiver
            .archive_at(&snapshot(&store).await, noon())
            .await
            .unwrap();
        assert_eq!(
            archived.archive_key,
            "archived/20250121_123005_1_novas_avaliacoes.csv"
        );
        assert_eq!(
            store.get("archived/20250121_123005_novas_avaliacoes.csv").unwrap(),
            "first"
        );
        assert_eq!(store.get(&archived.archive_key).unwrap(), "second");
    }

    #[tokio::test]
    async fn test_appended_rows_stay_in_source() {
        let store = Arc::new(MemoryArtifactStore::new());
        store.insert(KEY, "header\nrow1\n");
        let extracted = snapshot(&store).await;
        store.insert(KEY, "header\nrow1\nrow2\n");
        let archiver = Archiver::new(store.clone(), "archived");

        assert!(matches!(
            archiver.archive_at(&extracted, noon()).await,
            Err(Error::Archive(_))
        ));
        assert_eq!(store.get(KEY).unwrap(), "header\nrow1\nrow2\n");
        // the copy holds exactly what was extracted
        assert_eq!(
            store.get("archived/20250121_123005_novas_avaliacoes.csv").unwrap(),
            "header\nrow1\n"
        );
    }

    #[tokio::test]
    async fn test_copy_failure_leaves_source() {
        let store = Arc::new(MemoryArtifactStore::new());
        store.insert(KEY, "data");
        store.fail_creates_under(Some("archived/"));
        let archiver = Archiver::new(store.clone(), "archived");

        assert!(matches!(
            archiver.archive_at(&snapshot(&store).await, noon()).await,
            Err(Error::Archive(_))
        ));
        assert_eq!(store.keys(), vec![KEY.to_string()]);
    }

    #[tokio::test]
    async fn test_delete_failure_leaves_both_copies() {
        let store = Arc::new(MemoryArtifactStore::new());
        store.insert(KEY, "data");
        store.fail_deletes(true);
        let archiver = Archiver::new(store.clone(), "archived");

        assert!(matches!(
            archiver.archive_at(&snapshot(&store).await, noon()).await,
            Err(Error::Archive(_))
        ));
        assert_eq!(store.keys().len(), 2);
    }
}
