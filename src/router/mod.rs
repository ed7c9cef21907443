//! HTTP boundary layer
//!
//! Dispatches the three upload endpoints plus a health check, enforces the
//! configured body-size ceiling, and maps protocol results onto HTTP:
//! success → 200 with a JSON body, validation failure → 400 `{error,
//! details?}`, backend failure → 500 `{error, details}`. No business logic
//! lives here beyond field presence and body-shape checks.

use crate::protocol::{
    CompleteUploadRequest, PartUploadParams, ProtocolError, StartUploadRequest, UploadProtocol,
};
use bytes::Bytes;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use percent_encoding::percent_decode_str;
use hyper::{body::Body, Method, Request, Response, StatusCode};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{error, info};

/// Shared per-process state: the protocol (holding the backend client) and
/// the boundary limits. Read-only after startup.
pub struct AppState {
    pub protocol: UploadProtocol,
    pub max_body_size: usize,
}

/// Handle one HTTP request.
///
/// Generic over the body type so tests can drive it with
/// `http_body_util::Full` instead of a live connection.
pub async fn handle_request<B>(
    req: Request<B>,
    state: Arc<AppState>,
) -> Result<Response<String>, Infallible>
where
    B: Body + Send,
    B::Data: Send,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let path = req.uri().path().to_string();
    let method = req.method().clone();

    info!("Handling {} {}", method, path);

    let response = match (&method, path.as_str()) {
        (&Method::GET, "/health") => text_response(StatusCode::OK, "ok"),
        (&Method::POST, "/upload-start") => handle_upload_start(req, &state).await,
        (&Method::POST, "/upload-part") => handle_upload_part(req, &state).await,
        (&Method::POST, "/upload-complete") => handle_upload_complete(req, &state).await,
        (_, "/health" | "/upload-start" | "/upload-part" | "/upload-complete") => json_response(
            StatusCode::METHOD_NOT_ALLOWED,
            &json!({ "error": "Method not allowed" }),
        ),
        _ => json_response(StatusCode::NOT_FOUND, &json!({ "error": "Not found" })),
    };

    Ok(response)
}

async fn handle_upload_start<B>(req: Request<B>, state: &AppState) -> Response<String>
where
    B: Body + Send,
    B::Data: Send,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let body = match read_body(req.into_body(), state.max_body_size).await {
        Ok(bytes) => bytes,
        Err(response) => return response,
    };

    let request: StartUploadRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            return json_response(
                StatusCode::BAD_REQUEST,
                &json!({ "error": "Invalid JSON body", "details": e.to_string() }),
            )
        }
    };

    match state.protocol.start_upload(request).await {
        Ok(response) => json_ok(&response),
        Err(e) => protocol_error_response(e),
    }
}

async fn handle_upload_part<B>(req: Request<B>, state: &AppState) -> Response<String>
where
    B: Body + Send,
    B::Data: Send,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    // The part body is reserved for raw bytes. A request declaring a
    // structured body is the wrong shape for this endpoint; reject it
    // before touching the payload or the backend.
    if let Some(content_type) = req
        .headers()
        .get(hyper::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
    {
        if content_type.starts_with("application/json") {
            return json_response(
                StatusCode::BAD_REQUEST,
                &json!({
                    "error": "Body must be raw binary",
                    "details": "Send the part bytes as the raw request body, not JSON.",
                }),
            );
        }
    }

    let params = part_params(req.uri().query());

    let body = match read_body(req.into_body(), state.max_body_size).await {
        Ok(bytes) => bytes,
        Err(response) => return response,
    };

    match state.protocol.upload_part(params, body).await {
        Ok(response) => json_ok(&response),
        Err(e) => protocol_error_response(e),
    }
}

async fn handle_upload_complete<B>(req: Request<B>, state: &AppState) -> Response<String>
where
    B: Body + Send,
    B::Data: Send,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let body = match read_body(req.into_body(), state.max_body_size).await {
        Ok(bytes) => bytes,
        Err(response) => return response,
    };

    let request: CompleteUploadRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            return json_response(
                StatusCode::BAD_REQUEST,
                &json!({ "error": "Invalid JSON body", "details": e.to_string() }),
            )
        }
    };

    match state.protocol.complete_upload(request).await {
        Ok(response) => json_ok(&response),
        Err(e) => protocol_error_response(e),
    }
}

/// Extract upload-part parameters from the raw query string.
///
/// `uploadId` and `partNumber` are percent-decoded here: backend-issued
/// upload ids routinely contain `+`, `/` and `=`, which clients must encode
/// to survive a query string, and the backend expects the token verbatim.
/// `filename` stays encoded; the protocol layer's key decode is the one
/// place it is decoded, exactly once.
fn part_params(query: Option<&str>) -> PartUploadParams {
    let mut params = parse_query(query);
    PartUploadParams {
        filename: params.remove("filename"),
        upload_id: decode_query_value(params.remove("uploadId")),
        part_number: decode_query_value(params.remove("partNumber")),
    }
}

/// Percent-decode one query value. Values that do not decode to valid UTF-8
/// are treated as absent, which the protocol reports as a missing param.
fn decode_query_value(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        percent_decode_str(&v)
            .decode_utf8()
            .ok()
            .map(|cow| cow.into_owned())
    })
}

fn parse_query(query: Option<&str>) -> HashMap<String, String> {
    let mut params = HashMap::new();
    if let Some(q) = query {
        for pair in q.split('&') {
            let mut kv = pair.splitn(2, '=');
            if let Some(key) = kv.next() {
                let value = kv.next().unwrap_or("");
                params.insert(key.to_string(), value.to_string());
            }
        }
    }
    params
}

/// Buffer a request body with the configured ceiling applied. Over-limit
/// bodies get 413; any other read failure gets 400.
async fn read_body<B>(body: B, limit: usize) -> Result<Bytes, Response<String>>
where
    B: Body + Send,
    B::Data: Send,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) => {
            if e.downcast_ref::<LengthLimitError>().is_some() {
                Err(json_response(
                    StatusCode::PAYLOAD_TOO_LARGE,
                    &json!({ "error": "Body exceeds configured size limit" }),
                ))
            } else {
                Err(json_response(
                    StatusCode::BAD_REQUEST,
                    &json!({ "error": "Failed to read body", "details": e.to_string() }),
                ))
            }
        }
    }
}

fn protocol_error_response(err: ProtocolError) -> Response<String> {
    match err {
        ProtocolError::Validation { message, details } => {
            let body = match details {
                Some(details) => json!({ "error": message, "details": details }),
                None => json!({ "error": message }),
            };
            json_response(StatusCode::BAD_REQUEST, &body)
        }
        ProtocolError::Backend { message, details } => json_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            &json!({ "error": message, "details": details }),
        ),
    }
}

fn json_ok<T: Serialize>(value: &T) -> Response<String> {
    json_response(StatusCode::OK, value)
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<String> {
    let body = match serde_json::to_string(value) {
        Ok(body) => body,
        Err(e) => {
            error!("Failed to serialize response body: {}", e);
            return fallback_error_response();
        }
    };

    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(body)
        .unwrap_or_else(|_| fallback_error_response())
}

fn text_response(status: StatusCode, body: &str) -> Response<String> {
    Response::builder()
        .status(status)
        .header("Content-Type", "text/plain")
        .body(body.to_string())
        .unwrap_or_else(|_| fallback_error_response())
}

/// Last-resort response when building the intended one fails. Constructed
/// without the builder so this path cannot itself fail.
fn fallback_error_response() -> Response<String> {
    let mut response = Response::new(r#"{"error":"Internal server error"}"#.to_string());
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
}
