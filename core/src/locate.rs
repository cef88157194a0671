use crate::connector::{ArtifactHandle, ArtifactStore};
use crate::Result;
use std::sync::Arc;
use tracing::{debug, info};

/// Checks the well-known artifact key.
pub struct SourceLocator {
    store: Arc<dyn ArtifactStore>,
    key: String,
}

impl SourceLocator {
    pub fn new(store: Arc<dyn ArtifactStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    /// `None` means there is nothing to do: the artifact is missing or empty.
    pub async fn locate(&self) -> Result<Option<ArtifactHandle>> {
        let location = self.store.describe(&self.key);
        match self.store.stat(&self.key).await? {
            None => {
                info!(location = %location, "No new batch artifact");
                Ok(None)
            }
            Some(0) => {
                info!(location = %location, "Batch artifact is empty, nothing to process");
                Ok(None)
            }
            Some(size) => {
                debug!(location = %location, size, "Batch artifact found");
                Ok(Some(ArtifactHandle {
                    key: self.key.clone(),
                    size,
                }))
            }
        }
    }
}
