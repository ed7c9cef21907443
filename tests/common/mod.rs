//! Shared test fixtures: an in-memory multipart backend that answers with
//! deterministic values and records every call for inspection.

use bytes::Bytes;
use mpu_relay::s3::{
    CompletedPart, CreateUploadResponse, MultipartBackend, S3ClientError, UploadPartResponse,
};
use std::sync::Mutex;

/// Recorded upload_part call: (key, upload_id, part_number, body length).
pub type RecordedPart = (String, String, i32, usize);

/// Recorded complete call: (key, upload_id, canonical parts).
pub type RecordedCompletion = (String, String, Vec<CompletedPart>);

#[derive(Default)]
pub struct RecordingBackend {
    pub started: Mutex<Vec<(String, String)>>,
    pub parts: Mutex<Vec<RecordedPart>>,
    pub completed: Mutex<Vec<RecordedCompletion>>,
    /// When set, complete_multipart_upload fails with this backend detail.
    pub fail_complete_with: Option<&'static str>,
}

impl RecordingBackend {
    pub fn failing_completion(detail: &'static str) -> Self {
        RecordingBackend {
            fail_complete_with: Some(detail),
            ..Default::default()
        }
    }
}

#[async_trait::async_trait]
impl MultipartBackend for RecordingBackend {
    async fn create_multipart_upload(
        &self,
        key: &str,
        content_type: &str,
    ) -> Result<CreateUploadResponse, S3ClientError> {
        self.started
            .lock()
            .unwrap()
            .push((key.to_string(), content_type.to_string()));
        Ok(CreateUploadResponse {
            upload_id: "test-upload-id".into(),
        })
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> Result<UploadPartResponse, S3ClientError> {
        self.parts.lock().unwrap().push((
            key.to_string(),
            upload_id.to_string(),
            part_number,
            body.len(),
        ));
        // Quoted like the real backend; callers are expected to strip.
        Ok(UploadPartResponse {
            etag: format!("\"etag-{}\"", part_number),
        })
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> Result<(), S3ClientError> {
        if let Some(detail) = self.fail_complete_with {
            return Err(S3ClientError::BackendError {
                operation: "CompleteMultipartUpload",
                detail: detail.into(),
            });
        }
        self.completed
            .lock()
            .unwrap()
            .push((key.to_string(), upload_id.to_string(), parts));
        Ok(())
    }
}
