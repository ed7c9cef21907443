//! Upload session protocol
//!
//! The core state machine of the relay: each operation is a pure translation
//! from a validated client request to one backend call plus response
//! shaping. The relay keeps no session table between requests; session
//! identity (`uploadId`, `key`) round-trips through the client, and the
//! backend is the sole durable owner of session and part state.
//!
//! # Canonical forms
//!
//! - Object keys are percent-decoded exactly once, with the same
//!   transformation in `upload_part` and `complete_upload`.
//! - ETags are used unquoted everywhere; the backend's quoted form is
//!   stripped at this boundary.
//! - The completion manifest is sorted ascending by numeric part number
//!   before submission. The backend rejects out-of-order manifests, so this
//!   is a correctness requirement, not an optimization.

use crate::s3::{CompletedPart, MultipartBackend, S3ClientError};
use bytes::Bytes;
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Protocol errors. `Validation` surfaces as HTTP 400 without any backend
/// call; `Backend` surfaces as HTTP 500 with the backend detail preserved
/// verbatim.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("{message}")]
    Validation {
        message: String,
        details: Option<String>,
    },

    #[error("{message}: {details}")]
    Backend { message: String, details: String },
}

impl ProtocolError {
    fn validation(message: impl Into<String>) -> Self {
        ProtocolError::Validation {
            message: message.into(),
            details: None,
        }
    }

    fn validation_with(message: impl Into<String>, details: impl Into<String>) -> Self {
        ProtocolError::Validation {
            message: message.into(),
            details: Some(details.into()),
        }
    }

    fn backend(message: impl Into<String>, err: S3ClientError) -> Self {
        ProtocolError::Backend {
            message: message.into(),
            details: err.detail().to_string(),
        }
    }
}

/// Body of POST /upload-start. Fields are optional so that presence checks
/// produce protocol errors rather than deserialization failures.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartUploadRequest {
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub file_size: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartUploadResponse {
    pub upload_id: String,
    pub key: String,
}

/// Query parameters of POST /upload-part. The body carries raw bytes, so
/// these arrive in the query string, not as body fields.
#[derive(Debug, Default)]
pub struct PartUploadParams {
    pub filename: Option<String>,
    pub upload_id: Option<String>,
    pub part_number: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PartUploadResponse {
    pub etag: String,
}

/// Body of POST /upload-complete.
#[derive(Debug, Deserialize)]
pub struct CompleteUploadRequest {
    pub filename: Option<String>,
    #[serde(rename = "uploadId")]
    pub upload_id: Option<String>,
    pub parts: Option<Vec<ManifestEntry>>,
}

/// One client-supplied manifest entry. `PartNumber` may arrive as a JSON
/// number or a numeric string; both are accepted and coerced numerically.
#[derive(Debug, Deserialize)]
pub struct ManifestEntry {
    #[serde(rename = "PartNumber")]
    pub part_number: Option<serde_json::Value>,
    #[serde(rename = "ETag")]
    pub etag: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteUploadResponse {
    pub public_url: String,
}

/// Strip the surrounding quote characters the backend wraps ETags in.
fn canonical_etag(raw: &str) -> String {
    raw.trim_matches('"').to_string()
}

/// Percent-decode a client-supplied filename into the object key. Applied
/// exactly once per request; `complete_upload` and `upload_part` share this
/// so the two phases always agree on the key.
fn decode_key(filename: &str) -> Result<String, ProtocolError> {
    percent_decode_str(filename)
        .decode_utf8()
        .map(|cow| cow.into_owned())
        .map_err(|_| ProtocolError::validation("filename is not valid percent-encoded UTF-8"))
}

fn coerce_part_number(value: &serde_json::Value) -> Option<i32> {
    match value {
        serde_json::Value::Number(n) => n.as_i64().and_then(|v| i32::try_from(v).ok()),
        serde_json::Value::String(s) => s.trim().parse::<i32>().ok(),
        _ => None,
    }
}

/// Canonicalize and order the completion manifest: numeric part numbers
/// (string comparison would misorder "10" before "2"), unquoted etags,
/// ascending stable sort. Entries missing either field are a validation
/// error, never guessed.
fn canonicalize_manifest(entries: &[ManifestEntry]) -> Result<Vec<CompletedPart>, ProtocolError> {
    let mut parts = Vec::with_capacity(entries.len());

    for entry in entries {
        let part_number = entry
            .part_number
            .as_ref()
            .and_then(coerce_part_number)
            .filter(|n| *n >= 1)
            .ok_or_else(|| {
                ProtocolError::validation_with(
                    "Invalid parts list",
                    "every part must carry a positive numeric PartNumber",
                )
            })?;

        let etag = match entry.etag {
            Some(serde_json::Value::String(ref s)) => canonical_etag(s),
            _ => {
                return Err(ProtocolError::validation_with(
                    "Invalid parts list",
                    "every part must carry an ETag string",
                ))
            }
        };

        parts.push(CompletedPart { part_number, etag });
    }

    parts.sort_by_key(|p| p.part_number);
    Ok(parts)
}

fn require(field: Option<String>) -> Result<String, ProtocolError> {
    match field {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(ProtocolError::validation("Missing params")),
    }
}

/// Upload session protocol, shared read-only across all requests.
pub struct UploadProtocol {
    backend: Arc<dyn MultipartBackend>,
    public_base_url: String,
}

impl UploadProtocol {
    pub fn new(backend: Arc<dyn MultipartBackend>, public_base_url: &str) -> Self {
        Self {
            backend,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Start a multipart upload session.
    ///
    /// A declared size of exactly 0 is a distinct error, checked before the
    /// missing-params check: a zero-byte multipart upload is meaningless to
    /// the backend.
    #[tracing::instrument(name = "protocol.start_upload", skip(self, req), err)]
    pub async fn start_upload(
        &self,
        req: StartUploadRequest,
    ) -> Result<StartUploadResponse, ProtocolError> {
        if let Some(size) = req.file_size {
            if size <= 0 {
                return Err(ProtocolError::validation(
                    "File size must be greater than 0 bytes",
                ));
            }
        }

        let filename = require(req.filename)?;
        let content_type = require(req.content_type)?;

        let response = self
            .backend
            .create_multipart_upload(&filename, &content_type)
            .await
            .map_err(|e| ProtocolError::backend("Failed to start upload", e))?;

        Ok(StartUploadResponse {
            upload_id: response.upload_id,
            key: filename,
        })
    }

    /// Upload one part. Safely retryable by the client: part identity is
    /// the pair (uploadId, partNumber), and re-upload overwrites.
    #[tracing::instrument(
        name = "protocol.upload_part",
        skip(self, params, body),
        fields(upload.bytes = body.len()),
        err
    )]
    pub async fn upload_part(
        &self,
        params: PartUploadParams,
        body: Bytes,
    ) -> Result<PartUploadResponse, ProtocolError> {
        let (filename, upload_id, part_number) =
            match (params.filename, params.upload_id, params.part_number) {
                (Some(f), Some(u), Some(p)) if !f.is_empty() && !u.is_empty() && !p.is_empty() => {
                    (f, u, p)
                }
                _ => {
                    return Err(ProtocolError::validation_with(
                        "Missing params",
                        "Check filename, uploadId, or partNumber in query.",
                    ))
                }
            };

        let part_number: i32 = part_number
            .parse()
            .ok()
            .filter(|n| *n >= 1)
            .ok_or_else(|| {
                ProtocolError::validation_with(
                    "Invalid partNumber",
                    "partNumber must be a positive integer",
                )
            })?;

        let key = decode_key(&filename)?;

        let response = self
            .backend
            .upload_part(&key, &upload_id, part_number, body)
            .await
            .map_err(|e| ProtocolError::backend("Upload failed", e))?;

        Ok(PartUploadResponse {
            etag: canonical_etag(&response.etag),
        })
    }

    /// Finalize the upload from the client-assembled manifest and derive
    /// the public URL for the object. All-or-nothing from the client's
    /// perspective; backend detail messages are preserved verbatim because
    /// this is the step most likely to fail non-retryably.
    #[tracing::instrument(name = "protocol.complete_upload", skip(self, req), err)]
    pub async fn complete_upload(
        &self,
        req: CompleteUploadRequest,
    ) -> Result<CompleteUploadResponse, ProtocolError> {
        let filename = require(req.filename)?;
        let upload_id = require(req.upload_id)?;
        let entries = match req.parts {
            Some(entries) if !entries.is_empty() => entries,
            _ => return Err(ProtocolError::validation("Missing params")),
        };

        let parts = canonicalize_manifest(&entries)?;
        let key = decode_key(&filename)?;

        self.backend
            .complete_multipart_upload(&key, &upload_id, parts)
            .await
            .map_err(|e| ProtocolError::backend("Could not finalize upload on the backend", e))?;

        Ok(CompleteUploadResponse {
            public_url: format!("{}/{}", self.public_base_url, key),
        })
    }
}
