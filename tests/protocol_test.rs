//! Upload Protocol Integration Tests
//!
//! Full three-phase upload runs against an in-memory recording backend:
//! start, per-part upload, client-assembled completion manifest.

mod common;

use bytes::Bytes;
use common::RecordingBackend;
use mpu_relay::protocol::{
    CompleteUploadRequest, ManifestEntry, PartUploadParams, ProtocolError, StartUploadRequest,
    UploadProtocol,
};
use serde_json::json;
use std::sync::Arc;

fn protocol_with(backend: RecordingBackend) -> (UploadProtocol, Arc<RecordingBackend>) {
    let backend = Arc::new(backend);
    let protocol = UploadProtocol::new(backend.clone(), "https://cdn.example.com");
    (protocol, backend)
}

fn entry(part_number: serde_json::Value, etag: &str) -> ManifestEntry {
    ManifestEntry {
        part_number: Some(part_number),
        etag: Some(json!(etag)),
    }
}

/// Test: Full upload lifecycle. Parts are completed out of order by the
/// client; the backend must receive them sorted with unquoted etags.
#[tokio::test]
async fn test_full_upload_lifecycle() {
    let (protocol, backend) = protocol_with(RecordingBackend::default());

    // Phase 1: start
    let started = protocol
        .start_upload(StartUploadRequest {
            filename: Some("a.bin".into()),
            content_type: Some("application/octet-stream".into()),
            file_size: Some(10 * 1024 * 1024),
        })
        .await
        .unwrap();
    assert_eq!(started.upload_id, "test-upload-id");
    assert_eq!(started.key, "a.bin");

    // Phase 2: two parts
    let mut etags = Vec::new();
    for part_number in 1..=2 {
        let response = protocol
            .upload_part(
                PartUploadParams {
                    filename: Some("a.bin".into()),
                    upload_id: Some(started.upload_id.clone()),
                    part_number: Some(part_number.to_string()),
                },
                Bytes::from(vec![0u8; 64]),
            )
            .await
            .unwrap();
        etags.push(response.etag);
    }
    assert_eq!(etags, vec!["etag-1", "etag-2"]);

    // Phase 3: complete, manifest deliberately reversed
    let completed = protocol
        .complete_upload(CompleteUploadRequest {
            filename: Some("a.bin".into()),
            upload_id: Some(started.upload_id.clone()),
            parts: Some(vec![
                entry(json!(2), "\"etag-2\""),
                entry(json!(1), "\"etag-1\""),
            ]),
        })
        .await
        .unwrap();
    assert_eq!(completed.public_url, "https://cdn.example.com/a.bin");

    let recorded = backend.completed.lock().unwrap();
    let (key, upload_id, parts) = &recorded[0];
    assert_eq!(key, "a.bin");
    assert_eq!(upload_id, "test-upload-id");
    assert_eq!(
        parts
            .iter()
            .map(|p| (p.part_number, p.etag.as_str()))
            .collect::<Vec<_>>(),
        vec![(1, "etag-1"), (2, "etag-2")]
    );
}

/// Test: Re-uploading the same part number is accepted; part identity is
/// (uploadId, partNumber), so the retry simply lands again.
#[tokio::test]
async fn test_part_retry_is_accepted() {
    let (protocol, backend) = protocol_with(RecordingBackend::default());

    for _ in 0..2 {
        let response = protocol
            .upload_part(
                PartUploadParams {
                    filename: Some("a.bin".into()),
                    upload_id: Some("test-upload-id".into()),
                    part_number: Some("3".into()),
                },
                Bytes::from_static(b"same bytes"),
            )
            .await
            .unwrap();
        assert_eq!(response.etag, "etag-3");
    }

    let parts = backend.parts.lock().unwrap();
    assert_eq!(parts.len(), 2);
    assert_eq!(parts[0].2, 3);
    assert_eq!(parts[1].2, 3);
}

/// Test: Percent-encoded filenames decode exactly once and identically in
/// the part and completion phases, so both phases address the same key.
#[tokio::test]
async fn test_encoded_filename_decodes_once_in_both_phases() {
    let (protocol, backend) = protocol_with(RecordingBackend::default());
    let encoded = "report%202026%20final.pdf";

    protocol
        .upload_part(
            PartUploadParams {
                filename: Some(encoded.into()),
                upload_id: Some("test-upload-id".into()),
                part_number: Some("1".into()),
            },
            Bytes::from_static(b"pdf bytes"),
        )
        .await
        .unwrap();

    let completed = protocol
        .complete_upload(CompleteUploadRequest {
            filename: Some(encoded.into()),
            upload_id: Some("test-upload-id".into()),
            parts: Some(vec![entry(json!(1), "etag-1")]),
        })
        .await
        .unwrap();

    let part_key = backend.parts.lock().unwrap()[0].0.clone();
    let complete_key = backend.completed.lock().unwrap()[0].0.clone();
    assert_eq!(part_key, "report 2026 final.pdf");
    assert_eq!(complete_key, part_key);
    assert_eq!(
        completed.public_url,
        "https://cdn.example.com/report 2026 final.pdf"
    );
}

/// Test: String part numbers sort numerically, not lexically.
#[tokio::test]
async fn test_manifest_string_part_numbers_sort_numerically() {
    let (protocol, backend) = protocol_with(RecordingBackend::default());

    protocol
        .complete_upload(CompleteUploadRequest {
            filename: Some("big.iso".into()),
            upload_id: Some("test-upload-id".into()),
            parts: Some(vec![
                entry(json!("10"), "e10"),
                entry(json!("2"), "e2"),
                entry(json!("1"), "e1"),
            ]),
        })
        .await
        .unwrap();

    let recorded = backend.completed.lock().unwrap();
    let numbers: Vec<i32> = recorded[0].2.iter().map(|p| p.part_number).collect();
    assert_eq!(numbers, vec![1, 2, 10]);
}

/// Test: Completion failure surfaces the backend detail verbatim and
/// records nothing.
#[tokio::test]
async fn test_completion_failure_preserves_backend_detail() {
    let (protocol, backend) =
        protocol_with(RecordingBackend::failing_completion("InvalidPartOrder"));

    let result = protocol
        .complete_upload(CompleteUploadRequest {
            filename: Some("a.bin".into()),
            upload_id: Some("test-upload-id".into()),
            parts: Some(vec![entry(json!(1), "e1")]),
        })
        .await;

    match result {
        Err(ProtocolError::Backend { message, details }) => {
            assert_eq!(message, "Could not finalize upload on the backend");
            assert!(details.contains("InvalidPartOrder"));
        }
        other => panic!("expected backend error, got {:?}", other.err()),
    }
    assert!(backend.completed.lock().unwrap().is_empty());
}

/// Test: A manifest entry missing its ETag fails validation before any
/// backend call.
#[tokio::test]
async fn test_manifest_entry_missing_etag_never_reaches_backend() {
    let (protocol, backend) = protocol_with(RecordingBackend::default());

    let result = protocol
        .complete_upload(CompleteUploadRequest {
            filename: Some("a.bin".into()),
            upload_id: Some("test-upload-id".into()),
            parts: Some(vec![ManifestEntry {
                part_number: Some(json!(1)),
                etag: None,
            }]),
        })
        .await;

    assert!(matches!(result, Err(ProtocolError::Validation { .. })));
    assert!(backend.completed.lock().unwrap().is_empty());
}

/// Test: start_upload passes the content type through to the backend.
#[tokio::test]
async fn test_start_upload_forwards_content_type() {
    let (protocol, backend) = protocol_with(RecordingBackend::default());

    protocol
        .start_upload(StartUploadRequest {
            filename: Some("movie.mp4".into()),
            content_type: Some("video/mp4".into()),
            file_size: Some(1),
        })
        .await
        .unwrap();

    let started = backend.started.lock().unwrap();
    assert_eq!(started[0], ("movie.mp4".to_string(), "video/mp4".to_string()));
}
