use jsonschema::Validator;
use ratingsync_core::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

lazy_static::lazy_static! {
    static ref SCHEMA: Validator = {
        let schema = include_str!("../schema/config.json");
        let schema = serde_json::from_str(schema).expect("local store schema is valid JSON");
        Validator::new(&schema).expect("local store schema compiles")
    };
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalStoreConfig {
    /// Directory the artifact key, the archive prefix and the lease live under.
    pub root: PathBuf,
}

impl LocalStoreConfig {
    pub fn from_json(value: Value) -> Result<Self> {
        if let Err(error) = SCHEMA.validate(&value) {
            return Err(Error::Config(format!(
                "Schema validation failed: {}",
                error
            )));
        }
        serde_json::from_value(value)
            .map_err(|e| Error::Config(format!("Invalid local store config: {}", e)))
    }
}
