//! Admin JSON API (separate from S3 signature auth)
//!
//! A thin CRUD layer over the same metadata: access keys, buckets,
//! objects, presigned links and storage stats. Authenticated with a
//! bearer token minted by `POST /admin/auth/login`; login attempts are
//! rate-limited per client ip.

use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

use super::handlers::AppState;
use super::sig::v4::{presign_url, PresignRequest};
use super::token;
use crate::db::{AccessKey, BucketAcl, DbError};
use crate::ratelimit::RateLimiter;

/// Shared state for admin routes.
pub struct AdminState {
    pub app: Arc<AppState>,
    pub username: String,
    pub password_hash: String,
    pub token_secret: String,
    pub limiter: Arc<RateLimiter>,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

type AdminError = (StatusCode, Json<ErrorBody>);

fn err(status: StatusCode, message: impl Into<String>) -> AdminError {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
}

fn internal(e: impl std::fmt::Display) -> AdminError {
    err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

/// Build the `/admin` router. Everything except login/verify requires a
/// valid bearer token.
pub fn admin_router(state: Arc<AdminState>) -> Router {
    let protected = Router::new()
        .route("/admin/keys", get(list_keys).post(create_key))
        .route("/admin/keys/:access_key_id", axum::routing::patch(update_key).delete(delete_key))
        .route("/admin/buckets", get(list_buckets).post(create_bucket))
        .route("/admin/buckets/:bucket", axum::routing::delete(delete_bucket))
        .route("/admin/buckets/:bucket/objects", get(list_objects))
        .route(
            "/admin/buckets/:bucket/objects/*key",
            axum::routing::delete(delete_object),
        )
        .route("/admin/buckets/:bucket/link/*key", get(object_link))
        .route("/admin/stats", get(stats))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            require_admin,
        ));

    Router::new()
        .route("/admin/auth/login", post(login))
        .route("/admin/auth/verify", post(verify_token))
        .merge(protected)
        .with_state(state)
}

/// Bearer-token check for protected admin routes.
async fn require_admin(
    State(state): State<Arc<AdminState>>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AdminError> {
    let bearer = request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");

    match token::verify(bearer, &state.token_secret) {
        Some(_) => Ok(next.run(request).await),
        None => Err(err(StatusCode::UNAUTHORIZED, "invalid or expired token")),
    }
}

// ============================================================================
// Auth
// ============================================================================

#[derive(Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

#[derive(Serialize)]
struct LoginResponse {
    token: String,
}

/// POST /admin/auth/login — rate-limited 5 attempts / 15 min / ip.
async fn login(
    State(state): State<Arc<AdminState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AdminError> {
    let ip = addr.ip().to_string();
    if !state.limiter.check(&ip) {
        warn!("login rate limit hit for {}", ip);
        return Err(err(StatusCode::TOO_MANY_REQUESTS, "too many login attempts"));
    }

    let password_ok = bcrypt::verify(&body.password, &state.password_hash).unwrap_or(false);
    if body.username != state.username || !password_ok {
        return Err(err(StatusCode::UNAUTHORIZED, "invalid credentials"));
    }

    info!("admin login from {}", ip);
    Ok(Json(LoginResponse {
        token: token::mint(&body.username, &state.token_secret),
    }))
}

#[derive(Deserialize)]
struct VerifyRequest {
    token: String,
}

#[derive(Serialize)]
struct VerifyResponse {
    valid: bool,
}

/// POST /admin/auth/verify
async fn verify_token(
    State(state): State<Arc<AdminState>>,
    Json(body): Json<VerifyRequest>,
) -> Json<VerifyResponse> {
    Json(VerifyResponse {
        valid: token::verify(&body.token, &state.token_secret).is_some(),
    })
}

// ============================================================================
// Access keys
// ============================================================================

/// Key view without the secret.
#[derive(Serialize)]
struct KeyView {
    access_key_id: String,
    display_name: String,
    is_active: bool,
    created_at: String,
    updated_at: String,
}

impl From<AccessKey> for KeyView {
    fn from(k: AccessKey) -> Self {
        Self {
            access_key_id: k.access_key_id,
            display_name: k.display_name,
            is_active: k.is_active,
            created_at: k.created_at.to_rfc3339(),
            updated_at: k.updated_at.to_rfc3339(),
        }
    }
}

/// GET /admin/keys
async fn list_keys(State(state): State<Arc<AdminState>>) -> Result<Json<Vec<KeyView>>, AdminError> {
    let keys = state.app.db.list_access_keys().map_err(internal)?;
    Ok(Json(keys.into_iter().map(KeyView::from).collect()))
}

#[derive(Deserialize)]
struct CreateKeyRequest {
    #[serde(default)]
    display_name: String,
}

#[derive(Serialize)]
struct CreatedKey {
    access_key_id: String,
    /// Returned exactly once, on creation.
    secret_access_key: String,
    display_name: String,
}

fn generate_access_key_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .filter(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        .take(18)
        .map(char::from)
        .collect();
    format!("AK{}", suffix)
}

fn generate_secret() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(40)
        .map(char::from)
        .collect()
}

/// POST /admin/keys
async fn create_key(
    State(state): State<Arc<AdminState>>,
    Json(body): Json<CreateKeyRequest>,
) -> Result<Json<CreatedKey>, AdminError> {
    let access_key_id = generate_access_key_id();
    let secret = generate_secret();

    let key = state
        .app
        .db
        .insert_access_key(&access_key_id, &secret, &body.display_name)
        .map_err(internal)?;

    info!("created access key {}", key.access_key_id);
    Ok(Json(CreatedKey {
        access_key_id: key.access_key_id,
        secret_access_key: key.secret_access_key,
        display_name: key.display_name,
    }))
}

#[derive(Deserialize)]
struct UpdateKeyRequest {
    display_name: Option<String>,
    is_active: Option<bool>,
}

/// PATCH /admin/keys/{access_key_id}
async fn update_key(
    State(state): State<Arc<AdminState>>,
    Path(access_key_id): Path<String>,
    Json(body): Json<UpdateKeyRequest>,
) -> Result<StatusCode, AdminError> {
    let changed = state
        .app
        .db
        .update_access_key(&access_key_id, body.display_name.as_deref(), body.is_active)
        .map_err(internal)?;
    if !changed {
        return Err(err(StatusCode::NOT_FOUND, "no such access key"));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /admin/keys/{access_key_id} — owned buckets are reassigned to
/// another key, or the delete is refused.
async fn delete_key(
    State(state): State<Arc<AdminState>>,
    Path(access_key_id): Path<String>,
) -> Result<StatusCode, AdminError> {
    match state.app.db.delete_access_key(&access_key_id) {
        Ok(true) => Ok(StatusCode::NO_CONTENT),
        Ok(false) => Err(err(StatusCode::NOT_FOUND, "no such access key")),
        Err(DbError::Conflict(msg)) => Err(err(StatusCode::CONFLICT, msg)),
        Err(e) => Err(internal(e)),
    }
}

// ============================================================================
// Buckets
// ============================================================================

#[derive(Serialize)]
struct BucketView {
    name: String,
    owner: String,
    region: String,
    acl: String,
    objects: u64,
    created_at: String,
}

/// GET /admin/buckets
async fn list_buckets(
    State(state): State<Arc<AdminState>>,
) -> Result<Json<Vec<BucketView>>, AdminError> {
    let db = &state.app.db;
    let mut views = Vec::new();
    for bucket in db.list_buckets().map_err(internal)? {
        let owner = db
            .get_access_key_by_id(bucket.owner_id)
            .map_err(internal)?
            .map(|k| k.access_key_id)
            .unwrap_or_default();
        views.push(BucketView {
            name: bucket.name.clone(),
            owner,
            region: bucket.region,
            acl: bucket.acl.as_str().to_string(),
            objects: db.count_objects(bucket.id).map_err(internal)?,
            created_at: bucket.created_at.to_rfc3339(),
        });
    }
    Ok(Json(views))
}

#[derive(Deserialize)]
struct CreateBucketRequest {
    name: String,
    /// Owning access key; defaults to the first key in the store.
    owner: Option<String>,
    acl: Option<String>,
    #[serde(default)]
    max_size: u64,
}

/// POST /admin/buckets
async fn create_bucket(
    State(state): State<Arc<AdminState>>,
    Json(body): Json<CreateBucketRequest>,
) -> Result<StatusCode, AdminError> {
    if !super::handlers::bucket::is_valid_bucket_name(&body.name) {
        return Err(err(StatusCode::BAD_REQUEST, "invalid bucket name"));
    }
    if state.app.db.get_bucket(&body.name).map_err(internal)?.is_some() {
        return Err(err(StatusCode::CONFLICT, "bucket already exists"));
    }

    let acl = match body.acl.as_deref() {
        None => BucketAcl::Private,
        Some(s) => BucketAcl::parse(s)
            .ok_or_else(|| err(StatusCode::BAD_REQUEST, "acl must be private or public-read"))?,
    };

    let owner = match &body.owner {
        Some(id) => state
            .app
            .db
            .get_access_key(id)
            .map_err(internal)?
            .ok_or_else(|| err(StatusCode::BAD_REQUEST, "no such owner key"))?,
        None => state
            .app
            .db
            .list_access_keys()
            .map_err(internal)?
            .into_iter()
            .next()
            .ok_or_else(|| err(StatusCode::BAD_REQUEST, "no access keys exist yet"))?,
    };

    state
        .app
        .db
        .insert_bucket(&body.name, owner.id, &state.app.config.region, acl, body.max_size)
        .map_err(internal)?;
    state
        .app
        .store
        .create_bucket_dir(&body.name)
        .await
        .map_err(internal)?;

    info!("admin created bucket {}", body.name);
    Ok(StatusCode::CREATED)
}

/// DELETE /admin/buckets/{bucket} — purges all objects first, unlike the
/// S3 DeleteBucket which requires emptiness.
async fn delete_bucket(
    State(state): State<Arc<AdminState>>,
    Path(bucket): Path<String>,
) -> Result<StatusCode, AdminError> {
    let record = state
        .app
        .db
        .get_bucket(&bucket)
        .map_err(internal)?
        .ok_or_else(|| err(StatusCode::NOT_FOUND, "no such bucket"))?;

    state.app.db.delete_bucket(record.id).map_err(internal)?;
    state
        .app
        .store
        .delete_bucket_dir(&bucket)
        .await
        .map_err(internal)?;

    info!("admin deleted bucket {} (purged)", bucket);
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Objects
// ============================================================================

#[derive(Deserialize)]
struct ListObjectsQuery {
    #[serde(default)]
    prefix: String,
    after: Option<String>,
}

#[derive(Serialize)]
struct ObjectView {
    key: String,
    size: u64,
    etag: String,
    content_type: String,
    last_modified: String,
}

/// GET /admin/buckets/{bucket}/objects
async fn list_objects(
    State(state): State<Arc<AdminState>>,
    Path(bucket): Path<String>,
    Query(query): Query<ListObjectsQuery>,
) -> Result<Json<Vec<ObjectView>>, AdminError> {
    let record = state
        .app
        .db
        .get_bucket(&bucket)
        .map_err(internal)?
        .ok_or_else(|| err(StatusCode::NOT_FOUND, "no such bucket"))?;

    let page = state
        .app
        .db
        .list_objects_page(record.id, &query.prefix, query.after.as_deref(), 1000)
        .map_err(internal)?;

    Ok(Json(
        page.into_iter()
            .map(|o| ObjectView {
                key: o.key,
                size: o.size,
                etag: o.etag,
                content_type: o.content_type,
                last_modified: o.last_modified.to_rfc3339(),
            })
            .collect(),
    ))
}

/// DELETE /admin/buckets/{bucket}/objects/{key}
async fn delete_object(
    State(state): State<Arc<AdminState>>,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<StatusCode, AdminError> {
    let record = state
        .app
        .db
        .get_bucket(&bucket)
        .map_err(internal)?
        .ok_or_else(|| err(StatusCode::NOT_FOUND, "no such bucket"))?;

    let key = key.trim_start_matches('/');
    state
        .app
        .store
        .delete_object(&bucket, key)
        .await
        .map_err(internal)?;
    state.app.db.delete_object(record.id, key).map_err(internal)?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Presigned links
// ============================================================================

#[derive(Deserialize)]
struct LinkQuery {
    /// Validity in seconds; defaults to 15 minutes.
    expires: Option<u64>,
}

#[derive(Serialize)]
struct LinkResponse {
    url: String,
    expires_in: u64,
}

/// GET /admin/buckets/{bucket}/link/{key} — presigned GET URL signed
/// with the bucket owner's credentials.
async fn object_link(
    State(state): State<Arc<AdminState>>,
    Path((bucket, key)): Path<(String, String)>,
    Query(query): Query<LinkQuery>,
) -> Result<Json<LinkResponse>, AdminError> {
    let record = state
        .app
        .db
        .get_bucket(&bucket)
        .map_err(internal)?
        .ok_or_else(|| err(StatusCode::NOT_FOUND, "no such bucket"))?;

    let key = key.trim_start_matches('/').to_string();
    if state
        .app
        .db
        .get_object(record.id, &key)
        .map_err(internal)?
        .is_none()
    {
        return Err(err(StatusCode::NOT_FOUND, "no such object"));
    }

    let owner = state
        .app
        .db
        .get_access_key_by_id(record.owner_id)
        .map_err(internal)?
        .ok_or_else(|| err(StatusCode::CONFLICT, "bucket owner key is gone"))?;

    let expires = query.expires.unwrap_or(900);
    let host = state.app.config.advertised_host();
    let url = presign_url(&PresignRequest {
        method: "GET",
        host: &host,
        path: &format!("/{}/{}", bucket, key),
        access_key_id: &owner.access_key_id,
        secret_access_key: &owner.secret_access_key,
        region: &record.region,
        expires_secs: expires,
        now: Utc::now(),
    });

    Ok(Json(LinkResponse {
        url,
        expires_in: expires,
    }))
}

// ============================================================================
// Stats
// ============================================================================

#[derive(Serialize)]
struct StatsResponse {
    buckets: u64,
    objects: u64,
    total_bytes: u64,
}

/// GET /admin/stats
async fn stats(State(state): State<Arc<AdminState>>) -> Result<Json<StatsResponse>, AdminError> {
    let buckets = state.app.db.count_buckets().map_err(internal)?;
    let objects = state.app.db.count_all_objects().map_err(internal)?;
    let total_bytes = state.app.store.total_size().await.map_err(internal)?;

    Ok(Json(StatsResponse {
        buckets,
        objects,
        total_bytes,
    }))
}
