//! Multipart upload handlers
//!
//! Upload state lives in two metadata tables (uploads and parts); part
//! bodies are staged on disk until CompleteMultipartUpload assembles them
//! into the destination object. Transitions are row inserts/deletes;
//! Complete commits its row mutations in one transaction.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Extension;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::bucket::require_bucket;
use super::{extract_user_metadata, xml_response, AppState};
use crate::api::auth::BufferedBody;
use crate::api::sig::{self, quote_etag};
use crate::api::xml::{
    CompleteMultipartUploadRequest, CompleteMultipartUploadResult,
    InitiateMultipartUploadResult, ListPartsResult, PartInfo,
};
use crate::api::S3Error;
use crate::db::UploadRecord;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// POST object handler for multipart operations
/// POST /{bucket}/{key}?uploads    -> CreateMultipartUpload
/// POST /{bucket}/{key}?uploadId=X -> CompleteMultipartUpload
#[instrument(skip(state, headers, body))]
pub async fn post_object(
    State(state): State<Arc<AppState>>,
    Path((bucket, key)): Path<(String, String)>,
    Query(query): Query<MultipartPostQuery>,
    headers: HeaderMap,
    Extension(body): Extension<BufferedBody>,
) -> Result<Response, S3Error> {
    let key = key.trim_start_matches('/').to_string();

    if query.uploads.is_some() {
        return create_upload(&state, &bucket, &key, &headers).await;
    }

    if let Some(upload_id) = &query.upload_id {
        return complete_upload(&state, &bucket, &key, upload_id, &body.0).await;
    }

    Err(S3Error::InvalidArgument(
        "POST on an object requires ?uploads or ?uploadId".to_string(),
    ))
}

/// Query parameters for object-level POST
#[derive(Debug, serde::Deserialize, Default)]
pub struct MultipartPostQuery {
    pub uploads: Option<String>,
    #[serde(rename = "uploadId")]
    pub upload_id: Option<String>,
}

/// Look up an upload row, checking it belongs to (bucket, key).
fn require_upload(
    state: &AppState,
    upload_id: &str,
    bucket_id: i64,
    key: &str,
) -> Result<UploadRecord, S3Error> {
    let upload = state
        .db
        .get_upload(upload_id)?
        .ok_or_else(|| S3Error::NoSuchUpload(upload_id.to_string()))?;
    if upload.bucket_id != bucket_id || upload.key != key {
        return Err(S3Error::NoSuchUpload(upload_id.to_string()));
    }
    Ok(upload)
}

/// CreateMultipartUpload: a fresh random uploadId plus a row capturing
/// content type and user metadata for the eventual object.
async fn create_upload(
    state: &AppState,
    bucket: &str,
    key: &str,
    headers: &HeaderMap,
) -> Result<Response, S3Error> {
    info!("CreateMultipartUpload {}/{}", bucket, key);

    let bucket_row = require_bucket(state, bucket)?;

    let upload_id = Uuid::new_v4().to_string();
    let content_type = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or(DEFAULT_CONTENT_TYPE)
        .to_string();
    let metadata = extract_user_metadata(headers);

    state
        .db
        .insert_upload(&upload_id, bucket_row.id, key, &content_type, &metadata)?;

    let result = InitiateMultipartUploadResult {
        bucket: bucket.to_string(),
        key: key.to_string(),
        upload_id,
    };
    Ok(xml_response(result.to_xml()))
}

/// UploadPart: stage bytes, then upsert the part row by (uploadId,
/// partNumber). Re-uploading a part number overwrites.
pub async fn upload_part(
    state: &AppState,
    bucket: &str,
    key: &str,
    upload_id: &str,
    part_number: u32,
    body: &[u8],
) -> Result<Response, S3Error> {
    info!(
        "UploadPart {}/{} part={} uploadId={}",
        bucket, key, part_number, upload_id
    );

    if !(1..=10000).contains(&part_number) {
        return Err(S3Error::InvalidArgument(
            "Part number must be between 1 and 10000".to_string(),
        ));
    }

    let bucket_row = require_bucket(state, bucket)?;
    require_upload(state, upload_id, bucket_row.id, key)?;

    let etag = sig::etag_of(body);
    let staging_path = state.store.stage_part(upload_id, part_number, body).await?;
    state
        .db
        .upsert_part(upload_id, part_number, body.len() as u64, &etag, &staging_path)?;

    Ok((StatusCode::OK, [("ETag", quote_etag(&etag))], "").into_response())
}

/// ListParts: all staged parts for an upload, ascending by part number.
pub async fn list_parts(
    state: &AppState,
    bucket: &str,
    key: &str,
    upload_id: &str,
) -> Result<Response, S3Error> {
    info!("ListParts {}/{} uploadId={}", bucket, key, upload_id);

    let bucket_row = require_bucket(state, bucket)?;
    require_upload(state, upload_id, bucket_row.id, key)?;

    let parts = state
        .db
        .list_parts(upload_id)?
        .into_iter()
        .map(|p| PartInfo {
            part_number: p.part_number,
            etag: quote_etag(&p.etag),
            size: p.size,
            last_modified: p.created_at,
        })
        .collect();

    let result = ListPartsResult {
        bucket: bucket.to_string(),
        key: key.to_string(),
        upload_id: upload_id.to_string(),
        parts,
        max_parts: 1000,
        is_truncated: false,
    };
    Ok(xml_response(result.to_xml()))
}

/// CompleteMultipartUpload: validate the client's declared part list,
/// assemble staged bytes in ascending order, compute the composite ETag
/// and commit the object row while tearing down upload state.
async fn complete_upload(
    state: &AppState,
    bucket: &str,
    key: &str,
    upload_id: &str,
    body: &[u8],
) -> Result<Response, S3Error> {
    info!("CompleteMultipartUpload {}/{} uploadId={}", bucket, key, upload_id);

    let bucket_row = require_bucket(state, bucket)?;
    let upload = require_upload(state, upload_id, bucket_row.id, key)?;

    let body_str = std::str::from_utf8(body).map_err(|_| S3Error::MalformedXML)?;
    let request = CompleteMultipartUploadRequest::from_xml(body_str).map_err(|e| {
        warn!("failed to parse CompleteMultipartUpload XML: {}", e);
        S3Error::MalformedXML
    })?;

    if request.parts.is_empty() {
        return Err(S3Error::InvalidArgument(
            "You must specify at least one part".to_string(),
        ));
    }

    // Declared part numbers must be strictly ascending
    for window in request.parts.windows(2) {
        if window[0].part_number >= window[1].part_number {
            return Err(S3Error::InvalidPartOrder);
        }
    }

    let staged = state.db.list_parts(upload_id)?;

    let mut part_numbers = Vec::with_capacity(request.parts.len());
    let mut digests: Vec<[u8; 16]> = Vec::with_capacity(request.parts.len());
    for declared in &request.parts {
        let part = staged
            .iter()
            .find(|p| p.part_number == declared.part_number)
            .ok_or_else(|| {
                S3Error::InvalidArgument(format!(
                    "Part {} has not been uploaded",
                    declared.part_number
                ))
            })?;

        let declared_etag = declared.etag.trim_matches('"');
        if declared_etag != part.etag {
            return Err(S3Error::InvalidPart(format!(
                "part {} etag mismatch",
                declared.part_number
            )));
        }

        let mut digest = [0u8; 16];
        hex::decode_to_slice(&part.etag, &mut digest)
            .map_err(|_| S3Error::InternalError(format!("bad stored etag for part {}", part.part_number)))?;
        digests.push(digest);
        part_numbers.push(part.part_number);
    }

    let size = state
        .store
        .assemble_parts(upload_id, &part_numbers, bucket, key)
        .await?;
    let etag = sig::multipart_etag(&digests);

    state.db.complete_upload(
        upload_id,
        bucket_row.id,
        key,
        size,
        &etag,
        &upload.content_type,
        &state.store.storage_path_of(bucket, key),
        &upload.metadata,
    )?;

    let result = CompleteMultipartUploadResult {
        location: format!("/{}/{}", bucket, key),
        bucket: bucket.to_string(),
        key: key.to_string(),
        etag: quote_etag(&etag),
    };
    Ok(xml_response(result.to_xml()))
}

/// AbortMultipartUpload: purge staged bytes and rows. The upload must
/// belong to the addressed (bucket, key), like every other upload
/// operation; a stranger's uploadId is NoSuchUpload here too.
pub async fn abort_upload(
    state: &AppState,
    bucket: &str,
    key: &str,
    upload_id: &str,
) -> Result<Response, S3Error> {
    info!("AbortMultipartUpload {}/{} uploadId={}", bucket, key, upload_id);

    let bucket_row = require_bucket(state, bucket)?;
    require_upload(state, upload_id, bucket_row.id, key)?;

    state.store.purge_staging(upload_id).await?;
    state.db.delete_upload(upload_id)?;

    Ok(StatusCode::NO_CONTENT.into_response())
}
