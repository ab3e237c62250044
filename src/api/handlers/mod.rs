//! S3 request handlers and router construction

pub mod bucket;
pub mod multipart;
pub mod object;

use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use base64::Engine;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;

use super::S3Error;
use crate::config::Config;
use crate::db::Db;
use crate::storage::FsStore;

/// Application state shared across handlers
pub struct AppState {
    pub db: Arc<Db>,
    pub store: Arc<FsStore>,
    pub config: Config,
}

/// Build the S3 router. Layers (auth gate, tracing, CORS) are applied by
/// the caller so tests can wire the same routes.
pub fn s3_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Root: list buckets + HEAD probe for S3 client compatibility
        .route(
            "/",
            get(bucket::list_buckets)
                .head(head_root)
                .fallback(method_not_allowed),
        )
        // Object operations (wildcard routes first - more specific)
        .route(
            "/:bucket/*key",
            get(object::get_object)
                .put(object::put_object_or_copy)
                .delete(object::delete_object)
                .head(object::head_object)
                .post(multipart::post_object)
                .fallback(method_not_allowed),
        )
        // Bucket operations (with and without trailing slash)
        .route(
            "/:bucket",
            get(bucket::bucket_get_handler)
                .put(bucket::create_bucket)
                .delete(bucket::delete_bucket)
                .head(bucket::head_bucket)
                .post(object::delete_objects)
                .fallback(method_not_allowed),
        )
        .route(
            "/:bucket/",
            get(bucket::bucket_get_handler)
                .put(bucket::create_bucket)
                .delete(bucket::delete_bucket)
                .head(bucket::head_bucket)
                .post(object::delete_objects)
                .fallback(method_not_allowed),
        )
        .with_state(state)
}

/// Stamp every response, success and error, with per-request ids.
/// Browser clients read these through the CORS expose list; the pair
/// mirrors what real S3 attaches to each response.
pub async fn request_id_middleware(request: Request<Body>, next: Next) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    let mut extended = [0u8; 24];
    rand::thread_rng().fill(&mut extended);
    let id2 = base64::engine::general_purpose::STANDARD.encode(extended);

    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert("x-amz-request-id", hval(&request_id));
    headers.insert("x-amz-id-2", hval(&id2));
    response
}

/// HEAD / — unauthenticated connection probe; real S3 answers 200.
async fn head_root() -> StatusCode {
    StatusCode::OK
}

/// Unknown method on a known path (PROPFIND probes from WebDAV clients
/// land here): 405 as an S3 XML error.
async fn method_not_allowed() -> Response {
    S3Error::MethodNotAllowed.into_response()
}

/// Build a header value, falling back to empty on invalid bytes.
pub(crate) fn hval(s: &str) -> HeaderValue {
    HeaderValue::from_bytes(s.as_bytes()).unwrap_or_else(|_| HeaderValue::from_static(""))
}

/// Prefix marking user metadata headers.
pub(crate) const AMZ_META_PREFIX: &str = "x-amz-meta-";

/// Extract user-provided `x-amz-meta-*` headers (case-insensitive match,
/// prefix stripped, values preserved).
pub(crate) fn extract_user_metadata(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            let suffix = name.as_str().strip_prefix(AMZ_META_PREFIX)?;
            let v = value.to_str().ok()?;
            Some((suffix.to_string(), v.to_string()))
        })
        .collect()
}

/// XML response with the right content type.
pub(crate) fn xml_response(xml: String) -> Response {
    (StatusCode::OK, [("Content-Type", "application/xml")], xml).into_response()
}
