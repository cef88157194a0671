use crate::connector::ConnectorConfig;
use crate::error::{Error, Result};
use crate::types::DEFAULT_VACATION_THRESHOLD_DAYS;
use jsonschema::Validator;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;

lazy_static::lazy_static! {
    static ref PIPELINE_SCHEMA: Validator = {
        let schema = include_str!("../schema/pipeline.json");
        let schema = serde_json::from_str(schema).expect("pipeline schema is valid JSON");
        Validator::new(&schema).expect("pipeline schema compiles")
    };
}

/// Everything one pipeline run needs to know about its surroundings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_artifact_key")]
    pub artifact_key: String,
    pub artifact_location: ConnectorConfig,
    pub store_connection: ConnectorConfig,
    #[serde(default = "default_archive_prefix")]
    pub archive_prefix: String,
    #[serde(default = "default_vacation_threshold_days")]
    pub vacation_threshold_days: i64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_lease_ttl_secs")]
    pub lease_ttl_secs: u64,
}

fn default_artifact_key() -> String {
    "novas_avaliacoes.csv".to_string()
}
fn default_archive_prefix() -> String {
    "archived".to_string()
}
fn default_vacation_threshold_days() -> i64 {
    DEFAULT_VACATION_THRESHOLD_DAYS
}
fn default_connect_timeout_secs() -> u64 {
    5
}
fn default_lease_ttl_secs() -> u64 {
    900
}

impl PipelineConfig {
    pub fn from_json(value: Value) -> Result<Self> {
        if let Err(error) = PIPELINE_SCHEMA.validate(&value) {
            return Err(Error::Config(format!(
                "Schema validation failed: {}",
                error
            )));
        }
        serde_json::from_value(value)
            .map_err(|e| Error::Config(format!("Invalid pipeline config: {}", e)))
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Cannot read config file {}: {}", path.display(), e))
        })?;
        let value: Value = serde_json::from_str(&contents)
            .map_err(|e| Error::Config(format!("Config file is not valid JSON: {}", e)))?;
        Self::from_json(value)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_secs)
    }

    pub fn lease_key(&self) -> String {
        format!("{}.lease", self.artifact_key)
    }
}
