//! Shared test harness: a real stashd server on an ephemeral port with a
//! temp storage root, an in-memory metadata store and one seeded access
//! key, plus SigV4 signing helpers for the reqwest client.

#![allow(dead_code)]

use axum::middleware;
use chrono::Utc;
use sha2::{Digest, Sha256};
use stashd::api::admin::{admin_router, AdminState};
use stashd::api::auth::auth_middleware;
use stashd::api::handlers::{request_id_middleware, s3_router, AppState};
use stashd::api::sig::v4::{
    build_canonical_query_string, derive_signing_key, hmac_sha256, uri_encode, uri_encode_path,
};
use stashd::config::Config;
use stashd::db::Db;
use stashd::ratelimit::RateLimiter;
use stashd::storage::FsStore;
use std::net::SocketAddr;
use std::sync::Arc;
use tempfile::TempDir;

pub const TEST_ACCESS_KEY: &str = "AKIDTESTKEY000000000";
pub const TEST_SECRET: &str = "test-secret-test-secret-test-secret-00";

pub const ADMIN_USER: &str = "admin";
pub const ADMIN_PASSWORD: &str = "correct horse battery staple";
pub const ADMIN_SECRET: &str = "token-signing-secret";

pub struct TestServer {
    pub addr: SocketAddr,
    pub db: Arc<Db>,
    _storage: TempDir,
}

impl TestServer {
    /// Spawn a server with the S3 surface only.
    pub async fn spawn() -> Self {
        Self::spawn_inner(false).await
    }

    /// Spawn a server with the S3 surface plus the admin API.
    pub async fn spawn_with_admin() -> Self {
        Self::spawn_inner(true).await
    }

    async fn spawn_inner(with_admin: bool) -> Self {
        let storage = TempDir::new().unwrap();
        let db = Arc::new(Db::open_in_memory().unwrap());
        db.insert_access_key(TEST_ACCESS_KEY, TEST_SECRET, "test key")
            .unwrap();

        // Bind first so the advertised host (used by presigned links)
        // carries the real ephemeral port.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let store = Arc::new(FsStore::new(storage.path().to_path_buf()).await.unwrap());
        let config = Config {
            storage_path: storage.path().to_path_buf(),
            public_host: Some(format!("127.0.0.1:{}", addr.port())),
            ..Config::default()
        };

        let state = Arc::new(AppState {
            db: db.clone(),
            store,
            config,
        });

        let mut app = s3_router(state.clone())
            .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

        if with_admin {
            let admin_state = Arc::new(AdminState {
                app: state.clone(),
                username: ADMIN_USER.to_string(),
                password_hash: bcrypt::hash(ADMIN_PASSWORD, 4).unwrap(),
                token_secret: ADMIN_SECRET.to_string(),
                limiter: Arc::new(RateLimiter::new()),
            });
            app = app.merge(admin_router(admin_state));
        }

        let app = app.layer(middleware::from_fn(request_id_middleware));

        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });

        Self {
            addr,
            db,
            _storage: storage,
        }
    }

    pub fn host(&self) -> String {
        format!("127.0.0.1:{}", self.addr.port())
    }

    /// Full URL for a path plus optional (decoded) query pairs.
    pub fn url(&self, path: &str, query: &[(&str, &str)]) -> String {
        let mut url = format!("http://{}{}", self.host(), uri_encode_path(path));
        if !query.is_empty() {
            let qs = query
                .iter()
                .map(|(k, v)| format!("{}={}", uri_encode(k, true), uri_encode(v, true)))
                .collect::<Vec<_>>()
                .join("&");
            url.push('?');
            url.push_str(&qs);
        }
        url
    }

    /// SigV4 header-auth headers for a request, signed with the seeded key.
    pub fn sign(
        &self,
        method: &str,
        path: &str,
        query: &[(&str, &str)],
        body: &[u8],
    ) -> Vec<(String, String)> {
        sign_v4(
            method,
            &self.host(),
            path,
            query,
            body,
            TEST_ACCESS_KEY,
            TEST_SECRET,
        )
    }
}

/// Build SigV4 header-auth headers the way an SDK would:
/// SignedHeaders = host;x-amz-content-sha256;x-amz-date.
pub fn sign_v4(
    method: &str,
    host: &str,
    path: &str,
    query: &[(&str, &str)],
    body: &[u8],
    access_key_id: &str,
    secret: &str,
) -> Vec<(String, String)> {
    let now = Utc::now();
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date = now.format("%Y%m%d").to_string();
    let scope = format!("{}/us-east-1/s3/aws4_request", date);

    let payload_hash = hex::encode(Sha256::digest(body));
    let query_pairs: Vec<(String, String)> = query
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let canonical_query = build_canonical_query_string(&query_pairs, &[]);

    let canonical_request = format!(
        "{}\n{}\n{}\nhost:{}\nx-amz-content-sha256:{}\nx-amz-date:{}\n\nhost;x-amz-content-sha256;x-amz-date\n{}",
        method,
        uri_encode_path(path),
        canonical_query,
        host,
        payload_hash,
        amz_date,
        payload_hash
    );

    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{}",
        amz_date,
        scope,
        hex::encode(Sha256::digest(canonical_request.as_bytes()))
    );

    let signing_key = derive_signing_key(secret, &scope);
    let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

    vec![
        (
            "authorization".to_string(),
            format!(
                "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders=host;x-amz-content-sha256;x-amz-date, Signature={}",
                access_key_id, scope, signature
            ),
        ),
        ("x-amz-date".to_string(), amz_date),
        ("x-amz-content-sha256".to_string(), payload_hash),
    ]
}

/// Apply generated auth headers to a reqwest builder.
pub fn with_headers(
    mut req: reqwest::RequestBuilder,
    headers: Vec<(String, String)>,
) -> reqwest::RequestBuilder {
    for (name, value) in headers {
        req = req.header(name, value);
    }
    req
}

/// Deterministic pseudo-random bytes for content tests.
pub fn generate_binary(len: usize, seed: u64) -> Vec<u8> {
    let mut state = seed;
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (state >> 33) as u8
        })
        .collect()
}
