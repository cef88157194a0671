use crate::types::{EnrichedBatch, RawBatch};
use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Backend holding batch artifacts, their archive and the lease markers.
///
/// Keys are `/`-separated and relative to the backend's root (a directory or
/// a bucket). Implementations must not retry; every call either completes
/// within the backend's configured timeout or fails.
///
/// Every stored object has a revision: an opaque tag that changes whenever
/// the content changes. Conditional deletes compare against it, so a run
/// never removes an object someone else rewrote after it was read.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Human-readable location of `key`, used in log lines.
    fn describe(&self, key: &str) -> String;

    /// Size in bytes, or `None` when nothing is stored under `key`.
    async fn stat(&self, key: &str) -> Result<Option<u64>>;

    /// Content and revision of `key`, or `None` when nothing is stored there.
    async fn read(&self, key: &str) -> Result<Option<ArtifactSnapshot>>;

    /// Writes `bytes` under `key` only if the key is free and returns the new
    /// revision. `None` when something already exists there.
    async fn create_exclusive(&self, key: &str, bytes: Bytes) -> Result<Option<String>>;

    /// Deletes `key` only while its revision is still `revision`. Returns
    /// `false`, leaving the object alone, when it changed or is gone.
    async fn delete_if_match(&self, key: &str, revision: &str) -> Result<bool>;
}

/// An object's content as read at one moment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSnapshot {
    pub key: String,
    pub bytes: Bytes,
    pub revision: String,
    /// Last modification time, when the backend reports one.
    pub modified_at: Option<DateTime<Utc>>,
}

impl ArtifactSnapshot {
    /// Last path segment of the key.
    pub fn file_name(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }
}

/// A located, non-empty batch artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactHandle {
    pub key: String,
    pub size: u64,
}


#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedArtifact {
    pub source_key: String,
    pub archive_key: String,
}

/// JSON documents produced from one enriched batch.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentBatch {
    pub digest: String,
    pub documents: Vec<Value>,
}

#[async_trait]
pub trait DocumentSink: Send + Sync {
    /// Opens the connection. Failures map to `Error::LoadUnavailable`.
    async fn connect(&mut self) -> Result<()>;

    /// Inserts every document or none of them. Returns the number inserted.
    async fn write_batch(&mut self, batch: &DocumentBatch) -> Result<u64>;

    async fn close(&mut self) -> Result<()>;
}

pub trait Transform: Send + Sync {
    fn transform(&self, batch: RawBatch) -> Result<EnrichedBatch>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorConfig {
    #[serde(rename = "type")]
    pub connector_type: String,
    #[serde(default)]
    pub properties: HashMap<String, Value>,
}

impl ConnectorConfig {
    pub fn properties_json(&self) -> Value {
        Value::Object(serde_json::Map::from_iter(self.properties.clone()))
    }
}
