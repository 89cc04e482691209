use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage access denied: {0}")]
    Unauthorized(String),
    #[error("storage unreachable: {0}")]
    RetryLimitExceeded(String),
    #[error("object not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

#[async_trait]
pub trait ObjectStorage: Send + Sync + 'static {
    async fn put_object(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: Option<String>,
    ) -> StorageResult<()>;

    async fn presign_get_object(&self, key: &str, expires_in: Duration) -> StorageResult<String>;

    async fn delete_object(&self, key: &str) -> StorageResult<()>;
}

/// Deletes `key`, treating a missing object as success and only logging
/// other failures.
pub async fn delete_best_effort(storage: &dyn ObjectStorage, key: &str) {
    match storage.delete_object(key).await {
        Ok(()) => debug!(key, "deleted object"),
        Err(StorageError::NotFound(_)) => debug!(key, "object already gone"),
        Err(err) => warn!(key, error = %err, "failed to delete object"),
    }
}

pub struct S3Storage {
    client: S3Client,
    bucket: String,
}

impl S3Storage {
    pub fn new(client: S3Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }
}

fn classify<E, R>(action: &str, key: &str, err: SdkError<E, R>) -> StorageError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let detail = format!("{action} {key}: {}", DisplayErrorContext(&err));
    if matches!(err, SdkError::TimeoutError(_) | SdkError::DispatchFailure(_)) {
        return StorageError::RetryLimitExceeded(detail);
    }
    match err.code() {
        Some("AccessDenied" | "Forbidden" | "InvalidAccessKeyId" | "SignatureDoesNotMatch") => {
            StorageError::Unauthorized(detail)
        }
        Some("NoSuchKey" | "NotFound") => StorageError::NotFound(detail),
        _ => StorageError::Other(anyhow::anyhow!(detail)),
    }
}

#[async_trait]
impl ObjectStorage for S3Storage {
    async fn put_object(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: Option<String>,
    ) -> StorageResult<()> {
        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(bytes));

        if let Some(content_type) = content_type {
            request = request.content_type(content_type);
        }

        request
            .send()
            .await
            .map_err(|err| classify("upload", key, err))?;

        Ok(())
    }

    async fn presign_get_object(&self, key: &str, expires_in: Duration) -> StorageResult<String> {
        let presign_config = PresigningConfig::builder()
            .expires_in(expires_in)
            .build()
            .map_err(|err| anyhow::anyhow!("failed to build S3 presigning config: {err}"))?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presign_config)
            .await
            .map_err(|err| classify("presign", key, err))?;

        Ok(presigned.uri().to_string())
    }

    async fn delete_object(&self, key: &str) -> StorageResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| classify("delete", key, err))?;
        Ok(())
    }
}
