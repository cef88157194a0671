#![allow(dead_code)]

use ratingsync_core::{
    memory::{MemoryArtifactStore, MemorySink},
    PipelineConfig, PipelineJob,
};
use ratingsync_transforms::TripEnricher;
use serde_json::json;
use std::sync::Arc;

pub const ARTIFACT_KEY: &str = "novas_avaliacoes.csv";
pub const LEASE_KEY: &str = "novas_avaliacoes.csv.lease";

pub const SAMPLE_BATCH: &str = "\
id_cliente,destino,data_inicio,data_fim,nota_experiencia,nota_destino
cliente123, Salvador BA ,2025-01-10,2025-01-20,4,5
cliente456,\"Rio de Janeiro, RJ\",2024-02-01,2024-02-03,7,8
";

pub fn create_pipeline_config() -> PipelineConfig {
    PipelineConfig::from_json(json!({
        "artifact_key": ARTIFACT_KEY,
        "artifact_location": {"type": "memory"},
        "store_connection": {"type": "memory"},
        "archive_prefix": "archived",
        "vacation_threshold_days": 7,
        "connect_timeout_secs": 1,
        "lease_ttl_secs": 60
    }))
    .expect("test config is valid")
}

pub fn create_job(
    store: &MemoryArtifactStore,
    sink: &MemorySink,
) -> PipelineJob<TripEnricher> {
    let config = create_pipeline_config();
    PipelineJob::new(
        &config,
        Arc::new(store.clone()),
        TripEnricher::from_config(&config),
        Box::new(sink.clone()),
    )
}

/// Keys under the archive prefix.
pub fn archived_keys(store: &MemoryArtifactStore) -> Vec<String> {
    store
        .keys()
        .into_iter()
        .filter(|key| key.starts_with("archived/"))
        .collect()
}
