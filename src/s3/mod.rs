//! S3 backend client adapter
//!
//! Thin, retrying wrapper over the three multipart operations the relay
//! needs: CreateMultipartUpload, UploadPart and CompleteMultipartUpload.
//! The AWS SDK client is built once at startup and shared read-only across
//! all requests; retry ceiling and socket timeouts come from configuration.
//!
//! Backend failures never cross this boundary as raw SDK errors. Every
//! operation translates them into [`S3ClientError`], which always carries a
//! human-readable detail string for operator diagnosis.

use crate::config::S3Config;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    CompletedMultipartUpload, CompletedPart as SdkCompletedPart, ObjectCannedAcl,
};
use bytes::Bytes;
use std::time::Duration;
use thiserror::Error;

/// S3 client errors
#[derive(Error, Debug)]
pub enum S3ClientError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("{operation} failed: {detail}")]
    BackendError {
        operation: &'static str,
        detail: String,
    },
}

impl S3ClientError {
    /// Human-readable detail string, preserved verbatim from the backend
    /// where one exists.
    pub fn detail(&self) -> &str {
        match self {
            S3ClientError::ConfigError(msg) => msg,
            S3ClientError::BackendError { detail, .. } => detail,
        }
    }
}

fn backend_error<E>(operation: &'static str, err: E) -> S3ClientError
where
    E: std::error::Error + Send + Sync + 'static,
{
    S3ClientError::BackendError {
        operation,
        detail: DisplayErrorContext(&err).to_string(),
    }
}

/// CreateMultipartUpload response
#[derive(Debug, Clone)]
pub struct CreateUploadResponse {
    pub upload_id: String,
}

/// UploadPart response. The etag is raw as the backend returned it,
/// surrounding quotes included; canonicalization happens in the protocol
/// layer.
#[derive(Debug, Clone)]
pub struct UploadPartResponse {
    pub etag: String,
}

/// One entry of the completion manifest, already canonicalized and ordered
/// by the protocol layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: i32,
    pub etag: String,
}

/// Seam between the upload protocol and the storage backend.
///
/// The production implementation is [`S3Client`]; tests substitute an
/// in-memory fake to observe the exact manifest the protocol submits.
#[async_trait::async_trait]
pub trait MultipartBackend: Send + Sync {
    /// Start a multipart upload session for `key`
    async fn create_multipart_upload(
        &self,
        key: &str,
        content_type: &str,
    ) -> Result<CreateUploadResponse, S3ClientError>;

    /// Upload one part. Re-uploading the same part number overwrites it.
    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> Result<UploadPartResponse, S3ClientError>;

    /// Finalize the object from an ordered part manifest
    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> Result<(), S3ClientError>;
}

/// S3 Client
pub struct S3Client {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3Client {
    /// Create a new S3 client from configuration.
    ///
    /// Credentials are required: the relay exists so clients never hold
    /// them, which means the relay itself must.
    pub async fn new(config: &S3Config) -> Result<Self, S3ClientError> {
        let access_key = config
            .access_key
            .as_deref()
            .ok_or_else(|| S3ClientError::ConfigError("s3.access_key is not set".into()))?;
        let secret_key = config
            .secret_key
            .as_deref()
            .ok_or_else(|| S3ClientError::ConfigError("s3.secret_key is not set".into()))?;

        let credentials = Credentials::new(access_key, secret_key, None, None, "relay-config");

        let timeout = Duration::from_secs(config.timeout_secs);
        let timeout_config = aws_config::timeout::TimeoutConfig::builder()
            .connect_timeout(timeout)
            .operation_attempt_timeout(timeout)
            .build();
        let retry_config =
            aws_config::retry::RetryConfig::standard().with_max_attempts(config.max_attempts);

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .retry_config(retry_config)
            .timeout_config(timeout_config);

        if let Some(ref endpoint) = config.endpoint {
            loader = loader.endpoint_url(endpoint);
        }

        let sdk_config = loader.load().await;

        // Path-style addressing: S3-compatible stores rarely resolve
        // virtual-host bucket names.
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(config.endpoint.is_some())
            .build();

        Ok(Self {
            client: aws_sdk_s3::Client::from_conf(s3_config),
            bucket: config.bucket.clone(),
        })
    }

    /// Get the bucket name
    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait::async_trait]
impl MultipartBackend for S3Client {
    #[tracing::instrument(
        name = "s3.create_multipart_upload",
        skip(self),
        fields(s3.bucket = %self.bucket, s3.key = %key),
        err
    )]
    async fn create_multipart_upload(
        &self,
        key: &str,
        content_type: &str,
    ) -> Result<CreateUploadResponse, S3ClientError> {
        let response = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .acl(ObjectCannedAcl::PublicRead)
            .send()
            .await
            .map_err(|e| backend_error("CreateMultipartUpload", e))?;

        let upload_id = response.upload_id().ok_or(S3ClientError::BackendError {
            operation: "CreateMultipartUpload",
            detail: "backend returned no upload id".into(),
        })?;

        tracing::info!(upload_id = %upload_id, "CreateMultipartUpload completed");

        Ok(CreateUploadResponse {
            upload_id: upload_id.to_string(),
        })
    }

    #[tracing::instrument(
        name = "s3.upload_part",
        skip(self, body),
        fields(
            s3.bucket = %self.bucket,
            s3.upload_id = %upload_id,
            s3.part_number = part_number,
            upload.bytes = body.len()
        ),
        err
    )]
    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> Result<UploadPartResponse, S3ClientError> {
        let size = body.len();
        let response = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| backend_error("UploadPart", e))?;

        let etag = response.e_tag().ok_or(S3ClientError::BackendError {
            operation: "UploadPart",
            detail: "backend returned no etag".into(),
        })?;

        tracing::info!(
            etag = %etag,
            part_number = part_number,
            bytes = size,
            "UploadPart completed"
        );

        Ok(UploadPartResponse {
            etag: etag.to_string(),
        })
    }

    #[tracing::instrument(
        name = "s3.complete_multipart_upload",
        skip(self, parts),
        fields(
            s3.bucket = %self.bucket,
            s3.upload_id = %upload_id,
            parts_count = parts.len()
        ),
        err
    )]
    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> Result<(), S3ClientError> {
        let parts_count = parts.len();
        let manifest = CompletedMultipartUpload::builder()
            .set_parts(Some(
                parts
                    .into_iter()
                    .map(|p| {
                        SdkCompletedPart::builder()
                            .part_number(p.part_number)
                            .e_tag(p.etag)
                            .build()
                    })
                    .collect(),
            ))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(manifest)
            .send()
            .await
            .map_err(|e| backend_error("CompleteMultipartUpload", e))?;

        tracing::info!(parts = parts_count, "CompleteMultipartUpload completed");

        Ok(())
    }
}
