use jsonschema::Validator;
use ratingsync_core::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

lazy_static::lazy_static! {
    static ref SCHEMA: Validator = {
        let schema = include_str!("../schema/config.json");
        let schema = serde_json::from_str(schema).expect("s3 store schema is valid JSON");
        Validator::new(&schema).expect("s3 store schema compiles")
    };
}

/// Connection settings for an S3-compatible bucket (AWS, MinIO, or the GCS
/// XML interoperability endpoint).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3StoreConfig {
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    pub endpoint: Option<String>,
    /// When unset the default AWS credential chain is used.
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    #[serde(default)]
    pub force_path_style: bool,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

impl S3StoreConfig {
    pub fn from_json(value: Value) -> Result<Self> {
        if let Err(error) = SCHEMA.validate(&value) {
            return Err(Error::Config(format!(
                "Schema validation failed: {}",
                error
            )));
        }
        serde_json::from_value(value)
            .map_err(|e| Error::Config(format!("Invalid S3 store config: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_s3_config_validation() {
        let config = S3StoreConfig::from_json(json!({"bucket": "bucket-dados-viagens"})).unwrap();
        assert_eq!(config.region, "us-east-1");
        assert!(!config.force_path_style);
        assert!(config.access_key_id.is_none());

        let config = S3StoreConfig::from_json(json!({
            "bucket": "bucket-dados-viagens",
            "region": "auto",
            "endpoint": "https://storage.googleapis.com",
            "access_key_id": "GOOG1E",
            "secret_access_key": "secret",
            "force_path_style": true
        }))
        .unwrap();
        assert_eq!(config.endpoint.as_deref(), Some("https://storage.googleapis.com"));

        // key without secret
        assert!(S3StoreConfig::from_json(json!({
            "bucket": "bucket-dados-viagens",
            "access_key_id": "GOOG1E"
        }))
        .is_err());

        assert!(S3StoreConfig::from_json(json!({
            "bucket": "bucket-dados-viagens",
            "endpoint": "storage.googleapis.com"
        }))
        .is_err());

        assert!(S3StoreConfig::from_json(json!({"region": "us-east-1"})).is_err());
    }
}
