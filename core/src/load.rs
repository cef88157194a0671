use crate::connector::{DocumentBatch, DocumentSink};
use crate::error::{Error, Result};
use crate::types::{EnrichedBatch, LoadResult};
use std::time::Duration;
use tracing::{error, info, warn};

pub struct Loader {
    sink: Box<dyn DocumentSink>,
    connect_timeout: Duration,
}

impl Loader {
    pub fn new(sink: Box<dyn DocumentSink>, connect_timeout: Duration) -> Self {
        Self {
            sink,
            connect_timeout,
        }
    }

    /// Inserts the batch as one unit. An empty batch never opens a connection.
    pub async fn load(&mut self, batch: &EnrichedBatch) -> Result<LoadResult> {
        if batch.is_empty() {
            info!(key = %batch.source_key, "Empty batch, skipping document store");
            return Ok(LoadResult::default());
        }

        let documents = to_documents(batch)?;

        match tokio::time::timeout(self.connect_timeout, self.sink.connect()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!("{}", e);
                return Err(e);
            }
            Err(_) => {
                let err = Error::LoadUnavailable(format!(
                    "no connection within {:?}",
                    self.connect_timeout
                ));
                error!("{}", err);
                return Err(err);
            }
        }

        let written = self.sink.write_batch(&documents).await;
        if let Err(e) = self.sink.close().await {
            warn!(error = %e, "Failed to close document store connection");
        }
        let inserted_count = written?;

        info!(
            key = %batch.source_key,
            inserted = inserted_count,
            "Batch loaded into document store"
        );
        Ok(LoadResult { inserted_count })
    }
}

pub fn to_documents(batch: &EnrichedBatch) -> Result<DocumentBatch> {
    let documents = batch
        .records
        .iter()
        .map(serde_json::to_value)
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(DocumentBatch {
        digest: batch.digest.clone(),
        documents,
    })
}
