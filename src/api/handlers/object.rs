//! Object-level S3 handlers

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Extension;
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use super::bucket::require_bucket;
use super::multipart;
use super::{extract_user_metadata, hval, xml_response, AppState};
use crate::api::auth::BufferedBody;
use crate::api::sig::{etag_of, quote_etag};
use crate::api::xml::{
    CopyObjectResult, DeleteError, DeleteRequest, DeleteResult, DeletedObject,
};
use crate::api::S3Error;
use crate::db::ObjectRecord;
use crate::storage::ByteRange;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Query parameters for object-level operations
#[derive(Debug, Deserialize, Default)]
pub struct ObjectQuery {
    /// UploadPart / CompleteMultipartUpload / ListParts / Abort
    #[serde(rename = "uploadId")]
    pub upload_id: Option<String>,
    /// UploadPart (PUT with ?partNumber)
    #[serde(rename = "partNumber")]
    pub part_number: Option<u32>,
}

/// Query parameters for bucket-level POST operations
#[derive(Debug, Deserialize, Default)]
pub struct BucketPostQuery {
    pub delete: Option<String>,
}

/// Parse a `Range: bytes=start-end` header against the object size.
/// `bytes=-N` (suffix form) yields the last N bytes. Returns InvalidRange
/// when the start lies at or past the object end, or start > end.
pub fn parse_range(header: &str, size: u64) -> Result<Option<ByteRange>, S3Error> {
    let Some(spec) = header.trim().strip_prefix("bytes=") else {
        return Ok(None);
    };
    let Some((start_s, end_s)) = spec.split_once('-') else {
        return Ok(None);
    };

    // Suffix form: last N bytes
    if start_s.is_empty() {
        let n: u64 = end_s.parse().map_err(|_| S3Error::InvalidRange)?;
        if n == 0 || size == 0 {
            return Err(S3Error::InvalidRange);
        }
        let start = size.saturating_sub(n);
        return Ok(Some(ByteRange {
            start,
            end: size - 1,
        }));
    }

    let start: u64 = start_s.parse().map_err(|_| S3Error::InvalidRange)?;
    let end: u64 = if end_s.is_empty() {
        size.saturating_sub(1)
    } else {
        end_s.parse().map_err(|_| S3Error::InvalidRange)?
    };

    if start >= size || start > end {
        return Err(S3Error::InvalidRange);
    }

    Ok(Some(ByteRange {
        start,
        end: end.min(size.saturating_sub(1)),
    }))
}

/// Response headers for an object: content headers plus reconstructed
/// `x-amz-meta-*` user metadata.
fn object_headers(record: &ObjectRecord, content_length: u64) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("ETag", hval(&quote_etag(&record.etag)));
    headers.insert("Content-Type", hval(&record.content_type));
    headers.insert("Content-Length", hval(&content_length.to_string()));
    headers.insert(
        "Last-Modified",
        hval(
            &record
                .last_modified
                .format("%a, %d %b %Y %H:%M:%S GMT")
                .to_string(),
        ),
    );
    headers.insert("Accept-Ranges", hval("bytes"));

    for (key, value) in &record.metadata {
        let name = format!("{}{}", super::AMZ_META_PREFIX, key);
        if let Ok(name) = axum::http::header::HeaderName::from_bytes(name.as_bytes()) {
            headers.insert(name, hval(value));
        }
    }

    headers
}

/// PUT object handler with copy and multipart-part detection
/// PUT /{bucket}/{key}                       -> PutObject
/// PUT /{bucket}/{key}?partNumber&uploadId   -> UploadPart
/// PUT /{bucket}/{key} + x-amz-copy-source   -> CopyObject
#[instrument(skip(state, headers, body))]
pub async fn put_object_or_copy(
    State(state): State<Arc<AppState>>,
    Path((bucket, key)): Path<(String, String)>,
    Query(query): Query<ObjectQuery>,
    headers: HeaderMap,
    Extension(body): Extension<BufferedBody>,
) -> Result<Response, S3Error> {
    let key = key.trim_start_matches('/').to_string();

    if let (Some(part_number), Some(upload_id)) = (query.part_number, &query.upload_id) {
        return multipart::upload_part(&state, &bucket, &key, upload_id, part_number, &body.0)
            .await;
    }

    if headers.contains_key("x-amz-copy-source") {
        return copy_object(&state, &bucket, &key, &headers).await;
    }

    put_object(&state, &bucket, &key, &headers, &body.0).await
}

/// PutObject: bytes to disk, then the row upsert (metadata is committed
/// last so readers never see a row without its bytes).
async fn put_object(
    state: &AppState,
    bucket: &str,
    key: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Response, S3Error> {
    info!("PUT {}/{} ({} bytes)", bucket, key, body.len());

    let record = require_bucket(state, bucket)?;

    if record.max_size > 0 && body.len() as u64 > record.max_size {
        return Err(S3Error::EntityTooLarge {
            size: body.len() as u64,
            max: record.max_size,
        });
    }

    let etag = etag_of(body);
    let content_type = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or(DEFAULT_CONTENT_TYPE)
        .to_string();
    let metadata = extract_user_metadata(headers);

    state.store.put_object(bucket, key, body).await?;
    state.db.upsert_object(
        record.id,
        key,
        body.len() as u64,
        &etag,
        &content_type,
        &state.store.storage_path_of(bucket, key),
        &metadata,
    )?;

    Ok((StatusCode::OK, [("ETag", quote_etag(&etag))], "").into_response())
}

/// CopyObject, triggered by the x-amz-copy-source header.
async fn copy_object(
    state: &AppState,
    bucket: &str,
    key: &str,
    headers: &HeaderMap,
) -> Result<Response, S3Error> {
    let copy_source = headers
        .get("x-amz-copy-source")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| S3Error::InvalidArgument("Missing x-amz-copy-source header".to_string()))?;

    let copy_source = urlencoding::decode(copy_source)
        .map_err(|_| S3Error::InvalidArgument("Invalid copy source encoding".to_string()))?;
    let copy_source = copy_source.trim_start_matches('/');
    let (source_bucket, source_key) = copy_source.split_once('/').ok_or_else(|| {
        S3Error::InvalidArgument("Copy source must be bucket/key".to_string())
    })?;

    info!("COPY {}/{} -> {}/{}", source_bucket, source_key, bucket, key);

    let source_bucket_row = require_bucket(state, source_bucket)?;
    let source = state
        .db
        .get_object(source_bucket_row.id, source_key)?
        .ok_or_else(|| S3Error::NoSuchKey(source_key.to_string()))?;
    let dest_bucket_row = require_bucket(state, bucket)?;

    let data = state.store.read_object_bytes(source_bucket, source_key).await?;
    state.store.put_object(bucket, key, &data).await?;

    state.db.upsert_object(
        dest_bucket_row.id,
        key,
        source.size,
        &source.etag,
        &source.content_type,
        &state.store.storage_path_of(bucket, key),
        &source.metadata,
    )?;

    let result = CopyObjectResult {
        etag: quote_etag(&source.etag),
        last_modified: Utc::now(),
    };
    Ok(xml_response(result.to_xml()))
}

/// GET object handler
/// GET /{bucket}/{key}            -> GetObject (with optional Range)
/// GET /{bucket}/{key}?uploadId=X -> ListParts
#[instrument(skip(state, headers))]
pub async fn get_object(
    State(state): State<Arc<AppState>>,
    Path((bucket, key)): Path<(String, String)>,
    Query(query): Query<ObjectQuery>,
    headers: HeaderMap,
) -> Result<Response, S3Error> {
    let key = key.trim_start_matches('/').to_string();

    if let Some(upload_id) = &query.upload_id {
        return multipart::list_parts(&state, &bucket, &key, upload_id).await;
    }

    info!("GET {}/{}", bucket, key);

    let bucket_row = require_bucket(&state, &bucket)?;
    let record = state
        .db
        .get_object(bucket_row.id, &key)?
        .ok_or_else(|| S3Error::NoSuchKey(key.clone()))?;

    let range = match headers.get("range").and_then(|v| v.to_str().ok()) {
        Some(header) => parse_range(header, record.size)?,
        None => None,
    };

    let stream = state.store.read_object(&bucket, &key, range).await?;

    match range {
        Some(ByteRange { start, end }) => {
            let mut response_headers = object_headers(&record, end - start + 1);
            response_headers.insert(
                "Content-Range",
                hval(&format!("bytes {}-{}/{}", start, end, record.size)),
            );
            debug!("GET {}/{} range {}-{}", bucket, key, start, end);
            Ok((
                StatusCode::PARTIAL_CONTENT,
                response_headers,
                Body::from_stream(stream),
            )
                .into_response())
        }
        None => Ok((
            StatusCode::OK,
            object_headers(&record, record.size),
            Body::from_stream(stream),
        )
            .into_response()),
    }
}

/// HEAD object handler
/// HEAD /{bucket}/{key}
#[instrument(skip(state))]
pub async fn head_object(
    State(state): State<Arc<AppState>>,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<Response, S3Error> {
    let key = key.trim_start_matches('/').to_string();
    info!("HEAD {}/{}", bucket, key);

    let bucket_row = require_bucket(&state, &bucket)?;
    let record = state
        .db
        .get_object(bucket_row.id, &key)?
        .ok_or_else(|| S3Error::NoSuchKey(key.clone()))?;

    Ok((StatusCode::OK, object_headers(&record, record.size)).into_response())
}

/// DELETE object handler
/// DELETE /{bucket}/{key}            -> DeleteObject (idempotent 204)
/// DELETE /{bucket}/{key}?uploadId=X -> AbortMultipartUpload
#[instrument(skip(state))]
pub async fn delete_object(
    State(state): State<Arc<AppState>>,
    Path((bucket, key)): Path<(String, String)>,
    Query(query): Query<ObjectQuery>,
) -> Result<Response, S3Error> {
    let key = key.trim_start_matches('/').to_string();

    if let Some(upload_id) = &query.upload_id {
        return multipart::abort_upload(&state, &bucket, &key, upload_id).await;
    }

    info!("DELETE {}/{}", bucket, key);

    let bucket_row = require_bucket(&state, &bucket)?;
    if state.db.get_object(bucket_row.id, &key)?.is_some() {
        state.store.delete_object(&bucket, &key).await?;
        state.db.delete_object(bucket_row.id, &key)?;
    }

    Ok(StatusCode::NO_CONTENT.into_response())
}

/// Batch delete handler
/// POST /{bucket}?delete
#[instrument(skip(state, body))]
pub async fn delete_objects(
    State(state): State<Arc<AppState>>,
    Path(bucket): Path<String>,
    Query(query): Query<BucketPostQuery>,
    Extension(body): Extension<BufferedBody>,
) -> Result<Response, S3Error> {
    if query.delete.is_none() {
        return Err(S3Error::InvalidArgument(
            "POST requires the ?delete query parameter".to_string(),
        ));
    }

    let bucket_row = require_bucket(&state, &bucket)?;

    let body_str = std::str::from_utf8(&body.0).map_err(|_| S3Error::MalformedXML)?;
    let delete_req = DeleteRequest::from_xml(body_str).map_err(|e| {
        warn!("failed to parse DeleteObjects XML: {}", e);
        S3Error::MalformedXML
    })?;

    info!(
        "DELETE multiple objects in {} ({} keys)",
        bucket,
        delete_req.objects.len()
    );

    let quiet = delete_req.quiet.unwrap_or(false);
    let mut deleted = Vec::new();
    let mut errors = Vec::new();

    for obj in delete_req.objects {
        let key = obj.key.trim_start_matches('/');
        let result = async {
            if state.db.get_object(bucket_row.id, key)?.is_some() {
                state.store.delete_object(&bucket, key).await?;
                state.db.delete_object(bucket_row.id, key)?;
            }
            Ok::<(), S3Error>(())
        }
        .await;

        match result {
            // Absent keys count as deleted, matching S3 batch semantics
            Ok(()) => deleted.push(DeletedObject {
                key: obj.key.clone(),
            }),
            Err(e) => {
                warn!("failed to delete {}/{}: {}", bucket, key, e);
                errors.push(DeleteError {
                    key: obj.key.clone(),
                    code: "InternalError".to_string(),
                    message: e.to_string(),
                });
            }
        }
    }

    let result = DeleteResult { deleted, errors };
    Ok(xml_response(result.to_xml(quiet)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_range_basic() {
        let r = parse_range("bytes=5-7", 12).unwrap().unwrap();
        assert_eq!(r, ByteRange { start: 5, end: 7 });
    }

    #[test]
    fn test_parse_range_open_ended() {
        let r = parse_range("bytes=5-", 12).unwrap().unwrap();
        assert_eq!(r, ByteRange { start: 5, end: 11 });
    }

    #[test]
    fn test_parse_range_suffix() {
        let r = parse_range("bytes=-4", 12).unwrap().unwrap();
        assert_eq!(r, ByteRange { start: 8, end: 11 });
        // Suffix longer than the object clamps to the whole body
        let r = parse_range("bytes=-100", 12).unwrap().unwrap();
        assert_eq!(r, ByteRange { start: 0, end: 11 });
    }

    #[test]
    fn test_parse_range_end_clamped() {
        let r = parse_range("bytes=5-9999", 12).unwrap().unwrap();
        assert_eq!(r, ByteRange { start: 5, end: 11 });
    }

    #[test]
    fn test_parse_range_invalid() {
        assert!(matches!(parse_range("bytes=12-13", 12), Err(S3Error::InvalidRange)));
        assert!(matches!(parse_range("bytes=9-5", 12), Err(S3Error::InvalidRange)));
        assert!(matches!(parse_range("bytes=0-0", 0), Err(S3Error::InvalidRange)));
    }

    #[test]
    fn test_parse_range_non_bytes_unit_ignored() {
        assert!(parse_range("items=0-5", 12).unwrap().is_none());
    }
}
