//! In-process backends for dry runs and tests.

use crate::connector::{ArtifactSnapshot, ArtifactStore, DocumentBatch, DocumentSink};
use crate::error::{Error, Result};
use crate::extract::content_digest;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Default)]
struct Faults {
    create_prefix: Mutex<Option<String>>,
    delete: AtomicBool,
}

#[derive(Clone)]
struct Entry {
    bytes: Bytes,
    modified_at: DateTime<Utc>,
}

/// Artifact store backed by a shared map. Clones see the same objects.
/// Revisions are content digests.
#[derive(Clone, Default)]
pub struct MemoryArtifactStore {
    objects: Arc<Mutex<BTreeMap<String, Entry>>>,
    faults: Arc<Faults>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: &str, contents: impl Into<Bytes>) {
        self.insert_at(key, contents, Utc::now());
    }

    /// Same as [`insert`](Self::insert) with an explicit modification time.
    pub fn insert_at(&self, key: &str, contents: impl Into<Bytes>, modified_at: DateTime<Utc>) {
        self.objects().insert(
            key.to_string(),
            Entry {
                bytes: contents.into(),
                modified_at,
            },
        );
    }

    pub fn get(&self, key: &str) -> Option<Bytes> {
        self.objects().get(key).map(|entry| entry.bytes.clone())
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects().keys().cloned().collect()
    }

    /// Makes `create_exclusive` fail for keys starting with `prefix`.
    pub fn fail_creates_under(&self, prefix: Option<&str>) {
        *self
            .faults
            .create_prefix
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = prefix.map(str::to_string);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.faults.delete.store(fail, Ordering::SeqCst);
    }

    fn objects(&self) -> MutexGuard<'_, BTreeMap<String, Entry>> {
        // a poisoned map is still consistent: every mutation is a single insert/remove
        self.objects.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn create_refused(&self, key: &str) -> bool {
        self.faults
            .create_prefix
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_deref()
            .is_some_and(|prefix| key.starts_with(prefix))
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    fn describe(&self, key: &str) -> String {
        format!("memory://{}", key)
    }

    async fn stat(&self, key: &str) -> Result<Option<u64>> {
        Ok(self.objects().get(key).map(|entry| entry.bytes.len() as u64))
    }

    async fn read(&self, key: &str) -> Result<Option<ArtifactSnapshot>> {
        Ok(self.objects().get(key).map(|entry| ArtifactSnapshot {
            key: key.to_string(),
            revision: content_digest(&entry.bytes),
            bytes: entry.bytes.clone(),
            modified_at: Some(entry.modified_at),
        }))
    }

    async fn create_exclusive(&self, key: &str, bytes: Bytes) -> Result<Option<String>> {
        if self.create_refused(key) {
            return Err(Error::Storage(format!("write to {} refused", key)));
        }
        let mut objects = self.objects();
        if objects.contains_key(key) {
            return Ok(None);
        }
        let revision = content_digest(&bytes);
        objects.insert(
            key.to_string(),
            Entry {
                bytes,
                modified_at: Utc::now(),
            },
        );
        Ok(Some(revision))
    }

    async fn delete_if_match(&self, key: &str, revision: &str) -> Result<bool> {
        if self.faults.delete.load(Ordering::SeqCst) {
            return Err(Error::Storage(format!("delete {} refused", key)));
        }
        let mut objects = self.objects();
        match objects.get(key) {
            Some(entry) if content_digest(&entry.bytes) == revision => {
                objects.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// What a [`MemorySink`] does when asked to connect or write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SinkBehavior {
    #[default]
    Accept,
    Unavailable,
    Reject,
}

/// Document sink that keeps inserted documents in memory.
#[derive(Clone, Default)]
pub struct MemorySink {
    documents: Arc<Mutex<Vec<(String, Value)>>>,
    behavior: SinkBehavior,
    connected: bool,
    connects: Arc<Mutex<u32>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_behavior(behavior: SinkBehavior) -> Self {
        Self {
            behavior,
            ..Self::default()
        }
    }

    /// Stored documents with the digest of the batch they came from.
    pub fn documents(&self) -> Vec<(String, Value)> {
        self.documents
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// How many times `connect` was called.
    pub fn connect_count(&self) -> u32 {
        *self.connects.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl DocumentSink for MemorySink {
    async fn connect(&mut self) -> Result<()> {
        *self.connects.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        if self.behavior == SinkBehavior::Unavailable {
            return Err(Error::LoadUnavailable(
                "memory sink configured as unreachable".into(),
            ));
        }
        self.connected = true;
        Ok(())
    }

    async fn write_batch(&mut self, batch: &DocumentBatch) -> Result<u64> {
        if !self.connected {
            return Err(Error::LoadUnavailable("Not connected".into()));
        }
        if self.behavior == SinkBehavior::Reject {
            return Err(Error::LoadRejected(
                "memory sink configured to reject writes".into(),
            ));
        }
        let mut documents = self.documents.lock().unwrap_or_else(|e| e.into_inner());
        documents.extend(
            batch
                .documents
                .iter()
                .map(|doc| (batch.digest.clone(), doc.clone())),
        );
        Ok(batch.documents.len() as u64)
    }

    async fn close(&mut self) -> Result<()> {
        self.connected = false;
        Ok(())
    }
}
