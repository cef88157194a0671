use ratingsync_core::{
    memory::{MemoryArtifactStore, MemorySink},
    ArtifactStore, DocumentSink, Error, PipelineConfig, Result,
};
use std::sync::Arc;
use tracing::warn;

pub async fn artifact_store(config: &PipelineConfig) -> Result<Arc<dyn ArtifactStore>> {
    let location = &config.artifact_location;
    match location.connector_type.as_str() {
        #[cfg(feature = "local")]
        "local" => Ok(Arc::new(ratingsync_local::LocalArtifactStore::new(
            location.clone(),
        )?)),
        #[cfg(feature = "s3")]
        "s3" => Ok(Arc::new(
            ratingsync_s3::S3ArtifactStore::new(location.clone(), config.connect_timeout())
                .await?,
        )),
        "memory" => {
            warn!("Using in-memory artifact store; nothing will be found");
            Ok(Arc::new(MemoryArtifactStore::new()))
        }
        other => Err(Error::Config(format!(
            "Unknown artifact location type: {}",
            other
        ))),
    }
}

pub fn document_sink(config: &PipelineConfig) -> Result<Box<dyn DocumentSink>> {
    let connection = &config.store_connection;
    match connection.connector_type.as_str() {
        #[cfg(feature = "mongodb")]
        "mongodb" => Ok(Box::new(ratingsync_mongodb::MongoSink::new(
            connection.clone(),
            config.connect_timeout(),
        )?)),
        #[cfg(feature = "postgres")]
        "postgres" => Ok(Box::new(ratingsync_postgres::PostgresSink::new(
            connection.clone(),
            config.connect_timeout(),
        )?)),
        "memory" => {
            warn!("Using in-memory document sink; documents are discarded on exit");
            Ok(Box::new(MemorySink::new()))
        }
        other => Err(Error::Config(format!(
            "Unknown store connection type: {}",
            other
        ))),
    }
}
