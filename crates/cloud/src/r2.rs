//! Cloudflare R2 backend over the S3 API.

use std::fmt;

use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{BehaviorVersion, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;

use crate::storage::{public_url, ObjectStorage, StorageError};

/// R2 uses a single pseudo-region.
const R2_REGION: &str = "auto";

/// Credentials and addressing for one R2 bucket.
#[derive(Clone)]
pub struct R2Config {
    pub account_id: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket: String,
    /// Public base URL objects are served from.
    pub public_url: String,
}

impl R2Config {
    /// S3 endpoint for the account.
    pub fn endpoint(&self) -> String {
        format!("https://{}.r2.cloudflarestorage.com", self.account_id)
    }
}

impl fmt::Debug for R2Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("R2Config")
            .field("account_id", &self.account_id)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("bucket", &self.bucket)
            .field("public_url", &self.public_url)
            .finish()
    }
}

/// [`ObjectStorage`] backed by an R2 bucket.
pub struct R2Storage {
    client: aws_sdk_s3::Client,
    bucket: String,
    public_url: String,
}

impl R2Storage {
    /// Build an S3 client for the configured account.
    pub async fn connect(config: &R2Config) -> Self {
        let credentials = Credentials::new(
            config.access_key_id.clone(),
            config.secret_access_key.clone(),
            None,
            None,
            "instafit-r2",
        );

        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(R2_REGION))
            .endpoint_url(config.endpoint())
            .credentials_provider(credentials)
            .load()
            .await;

        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(true)
            .build();

        tracing::info!(bucket = %config.bucket, endpoint = %config.endpoint(), "R2 storage configured");

        Self {
            client: aws_sdk_s3::Client::from_conf(s3_config),
            bucket: config.bucket.clone(),
            public_url: config.public_url.clone(),
        }
    }
}

#[async_trait]
impl ObjectStorage for R2Storage {
    async fn upload(
        &self,
        data: Bytes,
        key: &str,
        content_type: &str,
    ) -> Result<String, StorageError> {
        let size = data.len();
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| StorageError::Upload {
                key: key.to_string(),
                message: DisplayErrorContext(&e).to_string(),
            })?;

        tracing::debug!(key, bytes = size, "Uploaded object");
        Ok(public_url(&self.public_url, key))
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::Delete {
                key: key.to_string(),
                message: DisplayErrorContext(&e).to_string(),
            })?;

        tracing::debug!(key, "Deleted object");
        Ok(())
    }
}
