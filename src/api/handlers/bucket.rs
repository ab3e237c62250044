//! Bucket-level S3 handlers

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Extension;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, instrument};

use super::{xml_response, AppState};
use crate::api::auth::Principal;
use crate::api::xml::{
    self, BucketInfo, ListBucketResult, ListBucketsResult, S3Object,
};
use crate::api::S3Error;
use crate::api::sig::quote_etag;
use crate::db::{Bucket, BucketAcl};

/// Query parameters for bucket-level GET operations
#[derive(Debug, Deserialize, Default)]
pub struct BucketGetQuery {
    pub prefix: Option<String>,
    pub delimiter: Option<String>,
    #[serde(rename = "list-type")]
    pub list_type: Option<u8>,
    #[serde(rename = "max-keys")]
    pub max_keys: Option<u32>,
    #[serde(rename = "continuation-token")]
    pub continuation_token: Option<String>,
    /// ListObjects v1 pagination
    pub marker: Option<String>,
    /// GetBucketLocation marker parameter
    pub location: Option<String>,
    /// GetBucketVersioning marker parameter
    pub versioning: Option<String>,
    /// GetBucketAcl marker parameter
    pub acl: Option<String>,
}

/// Validate a bucket name against `[a-z0-9][a-z0-9.-]{1,61}[a-z0-9]`
/// (3-63 chars).
pub fn is_valid_bucket_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    if bytes.len() < 3 || bytes.len() > 63 {
        return false;
    }
    let edge = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    let middle = |b: u8| edge(b) || b == b'.' || b == b'-';
    edge(bytes[0])
        && edge(bytes[bytes.len() - 1])
        && bytes[1..bytes.len() - 1].iter().all(|&b| middle(b))
}

/// Look up a bucket row or fail with NoSuchBucket.
pub(super) fn require_bucket(state: &AppState, name: &str) -> Result<Bucket, S3Error> {
    state
        .db
        .get_bucket(name)?
        .ok_or_else(|| S3Error::NoSuchBucket(name.to_string()))
}

/// LIST buckets handler
/// GET /
///
/// Returns every bucket in the store; the Owner block carries the
/// caller's access key id.
#[instrument(skip(state, principal))]
pub async fn list_buckets(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
) -> Result<Response, S3Error> {
    info!("LIST buckets");

    let buckets = state.db.list_buckets()?;
    let result = ListBucketsResult {
        owner_id: principal.access_key_id().to_string(),
        owner_display_name: principal.access_key_id().to_string(),
        buckets: buckets
            .into_iter()
            .map(|b| BucketInfo {
                name: b.name,
                creation_date: b.created_at,
            })
            .collect(),
    };

    Ok(xml_response(result.to_xml()))
}

/// CREATE bucket handler
/// PUT /{bucket}
#[instrument(skip(state, principal))]
pub async fn create_bucket(
    State(state): State<Arc<AppState>>,
    Path(bucket): Path<String>,
    Extension(principal): Extension<Principal>,
) -> Result<Response, S3Error> {
    info!("CREATE bucket {}", bucket);

    if !is_valid_bucket_name(&bucket) {
        return Err(S3Error::InvalidBucketName(bucket));
    }

    if state.db.get_bucket(&bucket)?.is_some() {
        return Err(S3Error::BucketAlreadyExists(bucket));
    }

    let owner_id = principal.key_id().ok_or(S3Error::AccessDenied)?;
    state.db.insert_bucket(
        &bucket,
        owner_id,
        &state.config.region,
        BucketAcl::Private,
        0,
    )?;
    state.store.create_bucket_dir(&bucket).await?;

    Ok((StatusCode::OK, [("Location", format!("/{}", bucket))], "").into_response())
}

/// HEAD bucket handler
/// HEAD /{bucket}
#[instrument(skip(state))]
pub async fn head_bucket(
    State(state): State<Arc<AppState>>,
    Path(bucket): Path<String>,
) -> Result<Response, S3Error> {
    let bucket = require_bucket(&state, &bucket)?;
    Ok((
        StatusCode::OK,
        [("x-amz-bucket-region", bucket.region)],
    )
        .into_response())
}

/// DELETE bucket handler
/// DELETE /{bucket}
#[instrument(skip(state))]
pub async fn delete_bucket(
    State(state): State<Arc<AppState>>,
    Path(bucket): Path<String>,
) -> Result<Response, S3Error> {
    info!("DELETE bucket {}", bucket);

    let record = require_bucket(&state, &bucket)?;
    if state.db.count_objects(record.id)? > 0 {
        return Err(S3Error::BucketNotEmpty(bucket));
    }

    state.db.delete_bucket(record.id)?;
    state.store.delete_bucket_dir(&record.name).await?;

    Ok(StatusCode::NO_CONTENT.into_response())
}

/// Bucket-level GET handler - dispatches on query params
/// GET /{bucket}?location    -> GetBucketLocation
/// GET /{bucket}?versioning  -> GetBucketVersioning (always empty)
/// GET /{bucket}?acl         -> GetBucketAcl
/// GET /{bucket}             -> ListObjects (v1 or v2)
#[instrument(skip(state, query))]
pub async fn bucket_get_handler(
    State(state): State<Arc<AppState>>,
    Path(bucket): Path<String>,
    Query(query): Query<BucketGetQuery>,
) -> Result<Response, S3Error> {
    let record = require_bucket(&state, &bucket)?;

    if query.location.is_some() {
        info!("GET bucket location: {}", bucket);
        return Ok(xml_response(xml::location_constraint(&record.region)));
    }

    if query.versioning.is_some() {
        info!("GET bucket versioning: {}", bucket);
        return Ok(xml_response(xml::versioning_configuration()));
    }

    if query.acl.is_some() {
        info!("GET bucket acl: {}", bucket);
        let owner = state
            .db
            .get_access_key_by_id(record.owner_id)?
            .map(|k| k.access_key_id)
            .unwrap_or_else(|| record.owner_id.to_string());
        return Ok(xml_response(xml::access_control_policy(&owner)));
    }

    list_objects(&state, &record, query).await
}

/// ListObjects over the key-ordered metadata scan. `list-type=2` selects
/// the v2 shape (continuation-token / KeyCount); anything else answers
/// with the v1 marker shape over the same scan.
async fn list_objects(
    state: &AppState,
    bucket: &Bucket,
    query: BucketGetQuery,
) -> Result<Response, S3Error> {
    let is_v2 = query.list_type == Some(2);
    let prefix = query.prefix.unwrap_or_default();
    let delimiter = query.delimiter.clone().filter(|d| !d.is_empty());
    let max_keys = query.max_keys.unwrap_or(1000).clamp(1, 1000);
    let token = if is_v2 {
        query.continuation_token.clone()
    } else {
        query.marker.clone()
    };

    info!("LIST {}/{}*", bucket.name, prefix);

    // One extra row decides truncation
    let mut page =
        state
            .db
            .list_objects_page(bucket.id, &prefix, token.as_deref(), max_keys + 1)?;
    let is_truncated = page.len() as u32 > max_keys;
    page.truncate(max_keys as usize);
    let next_token = if is_truncated {
        page.last().map(|o| o.key.clone())
    } else {
        None
    };

    let all_objects: Vec<S3Object> = page
        .into_iter()
        .map(|o| S3Object::new(o.key, o.size, o.last_modified, quote_etag(&o.etag)))
        .collect();

    // With a delimiter, keys containing it after the prefix roll up into
    // deduplicated, sorted CommonPrefixes and leave Contents.
    let (contents, common_prefixes) = if let Some(ref delim) = delimiter {
        let mut prefixes = BTreeSet::new();
        let mut direct = Vec::new();

        for obj in all_objects {
            let after_prefix = &obj.key[prefix.len()..];
            if let Some(pos) = after_prefix.find(delim.as_str()) {
                prefixes.insert(format!("{}{}{}", prefix, &after_prefix[..pos], delim));
            } else {
                direct.push(obj);
            }
        }

        (direct, prefixes.into_iter().collect::<Vec<_>>())
    } else {
        (all_objects, Vec::new())
    };

    let result = if is_v2 {
        ListBucketResult::new_v2(
            bucket.name.clone(),
            prefix,
            delimiter,
            max_keys,
            contents,
            common_prefixes,
            token,
            next_token,
            is_truncated,
        )
    } else {
        ListBucketResult::new_v1(
            bucket.name.clone(),
            prefix,
            delimiter,
            max_keys,
            contents,
            common_prefixes,
            token,
            next_token,
            is_truncated,
        )
    };

    Ok(xml_response(result.to_xml()))
}
