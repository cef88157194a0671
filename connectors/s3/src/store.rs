use crate::config::S3StoreConfig;
use async_trait::async_trait;
use aws_config::timeout::TimeoutConfig;
use aws_config::BehaviorVersion;
use aws_credential_types::provider::SharedCredentialsProvider;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use ratingsync_core::{
    connector::{ArtifactSnapshot, ArtifactStore, ConnectorConfig},
    Error, Result,
};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

fn storage_error(err: impl fmt::Display) -> Error {
    Error::Storage(err.to_string())
}

#[derive(Clone)]
pub struct S3ArtifactStore {
    client: Client,
    bucket: String,
}

impl S3ArtifactStore {
    pub async fn new(config: ConnectorConfig, timeout: Duration) -> Result<Self> {
        let config = S3StoreConfig::from_json(config.properties_json())?;
        Self::connect(config, timeout).await
    }

    /// Builds the client. Every request is bounded by `timeout`; the SDK's
    /// own retries are switched off so a failed run is retried by the next
    /// scheduled invocation instead.
    pub async fn connect(config: S3StoreConfig, timeout: Duration) -> Result<Self> {
        let timeouts = TimeoutConfig::builder()
            .connect_timeout(timeout)
            .operation_timeout(timeout)
            .build();

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .timeout_config(timeouts)
            .retry_config(aws_config::retry::RetryConfig::disabled());

        if let (Some(access_key), Some(secret_key)) =
            (&config.access_key_id, &config.secret_access_key)
        {
            let credentials = Credentials::new(access_key, secret_key, None, None, "static");
            loader = loader.credentials_provider(SharedCredentialsProvider::new(credentials));
        }

        let shared_config = loader.load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&shared_config);

        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        if config.force_path_style {
            builder = builder.force_path_style(true);
        }

        info!(bucket = %config.bucket, region = %config.region, "S3 artifact store ready");
        Ok(Self {
            client: Client::from_conf(builder.build()),
            bucket: config.bucket,
        })
    }
}

#[async_trait]
impl ArtifactStore for S3ArtifactStore {
    fn describe(&self, key: &str) -> String {
        format!("s3://{}/{}", self.bucket, key)
    }

    async fn stat(&self, key: &str) -> Result<Option<u64>> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(output) => Ok(Some(output.content_length().unwrap_or(0).max(0) as u64)),
            Err(err)
                if err
                    .as_service_error()
                    .map(|e| e.is_not_found())
                    .unwrap_or(false) =>
            {
                Ok(None)
            }
            Err(err) => Err(storage_error(err)),
        }
    }

    async fn read(&self, key: &str) -> Result<Option<ArtifactSnapshot>> {
        let output = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(output) => output,
            Err(SdkError::ServiceError(service_err)) if service_err.err().is_no_such_key() => {
                return Ok(None)
            }
            Err(err) => return Err(storage_error(err)),
        };

        let revision = output
            .e_tag()
            .map(str::to_string)
            .ok_or_else(|| Error::Storage(format!("no ETag returned for {}", key)))?;
        let modified_at = output
            .last_modified()
            .and_then(|t| DateTime::<Utc>::from_timestamp(t.secs(), t.subsec_nanos()));
        let data = output.body.collect().await.map_err(storage_error)?;

        Ok(Some(ArtifactSnapshot {
            key: key.to_string(),
            bytes: data.into_bytes(),
            revision,
            modified_at,
        }))
    }

    async fn create_exclusive(&self, key: &str, bytes: Bytes) -> Result<Option<String>> {
        let result = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .if_none_match("*")
            .body(ByteStream::from(bytes))
            .send()
            .await;

        match result {
            Ok(output) => {
                debug!(key, "Created object");
                output
                    .e_tag()
                    .map(|etag| Some(etag.to_string()))
                    .ok_or_else(|| Error::Storage(format!("no ETag returned for {}", key)))
            }
            Err(err) => match precondition_code(&err) {
                // 412 when the key exists, 409 when a concurrent conditional write won
                Some("PreconditionFailed") | Some("ConditionalRequestConflict") => Ok(None),
                _ => Err(storage_error(err)),
            },
        }
    }

    /// Needs a backend that honours `If-Match` on DeleteObject.
    async fn delete_if_match(&self, key: &str, revision: &str) -> Result<bool> {
        let result = self
            .client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .if_match(revision)
            .send()
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(err) => match precondition_code(&err) {
                Some("PreconditionFailed")
                | Some("ConditionalRequestConflict")
                | Some("NoSuchKey")
                | Some("NotFound") => Ok(false),
                _ => Err(storage_error(err)),
            },
        }
    }
}

fn precondition_code<E: ProvideErrorMetadata, R>(err: &SdkError<E, R>) -> Option<&str> {
    err.as_service_error().and_then(|e| e.code())
}
