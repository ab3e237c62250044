//! Per-request authentication gate
//!
//! Runs once before routing. Buffers the body (so signature verification
//! and handlers share the same bytes), classifies the request into a
//! signature mode, resolves the access key and verifies the signature.
//! Anonymous GET/HEAD is permitted only on public-read buckets.
//!
//! The gate attaches a [`Principal`] and the buffered body to the request
//! extensions for downstream handlers.

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, warn};

use super::handlers::AppState;
use super::sig::{v4::percent_decode, SigMode};
use super::S3Error;
use crate::db::BucketAcl;

/// Upper bound on a buffered request body.
const MAX_BODY_BYTES: usize = 1024 * 1024 * 1024;

/// The authenticated identity of a request.
#[derive(Debug, Clone)]
pub enum Principal {
    /// Unauthenticated read on a public-read bucket
    Anonymous,
    /// A verified access key
    Key { id: i64, access_key_id: String },
}

impl Principal {
    /// The access key id, or a fixed marker for anonymous principals.
    pub fn access_key_id(&self) -> &str {
        match self {
            Principal::Anonymous => "anonymous",
            Principal::Key { access_key_id, .. } => access_key_id,
        }
    }

    pub fn key_id(&self) -> Option<i64> {
        match self {
            Principal::Anonymous => None,
            Principal::Key { id, .. } => Some(*id),
        }
    }
}

/// The request body, fully buffered by the gate.
#[derive(Debug, Clone, Default)]
pub struct BufferedBody(pub Bytes);

/// Decode the raw query string into (key, value) pairs.
pub fn parse_query_pairs(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter(|s| !s.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (percent_decode(k), percent_decode(v)),
            None => (percent_decode(pair), String::new()),
        })
        .collect()
}

/// Axum middleware enforcing the authentication order of the gate.
pub async fn auth_middleware(
    axum::extract::State(state): axum::extract::State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, Response> {
    // CORS preflight carries no credentials; the CORS layer answers it
    if request.method() == Method::OPTIONS {
        return Ok(next.run(request).await);
    }

    // HEAD / is a connection probe (Cyberduck and friends); always 200
    if request.method() == Method::HEAD && request.uri().path() == "/" {
        return Ok(next.run(request).await);
    }

    // Non-S3 methods (WebDAV probes like PROPFIND) fall through to the
    // router's 405 instead of an auth challenge
    let known_method = matches!(
        *request.method(),
        Method::GET | Method::HEAD | Method::PUT | Method::POST | Method::DELETE
    );
    if !known_method {
        return Ok(next.run(request).await);
    }

    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let query = request.uri().query().unwrap_or("").to_string();

    // Buffer the body for methods that carry one
    let (mut parts, body) = request.into_parts();
    let body_bytes = if method == Method::PUT || method == Method::POST {
        match to_bytes(body, MAX_BODY_BYTES).await {
            Ok(b) => b,
            Err(_) => {
                return Err(S3Error::EntityTooLarge {
                    size: 0,
                    max: MAX_BODY_BYTES as u64,
                }
                .into_response())
            }
        }
    } else {
        Bytes::new()
    };

    let query_pairs = parse_query_pairs(&query);

    let principal = match SigMode::classify(&query_pairs, &parts.headers) {
        Some(mode) => {
            let access_key_id = match mode.access_key_id(&query_pairs, &parts.headers) {
                Ok(id) => id,
                Err(e) => return Err(e.into_response()),
            };

            let key = match state.db.get_access_key(&access_key_id) {
                Ok(Some(key)) if key.is_active => key,
                Ok(_) => {
                    warn!(
                        "auth rejected: unknown or inactive key {} ({} {})",
                        access_key_id, method, path
                    );
                    return Err(S3Error::AccessDenied.into_response());
                }
                Err(e) => return Err(S3Error::from(e).into_response()),
            };

            if let Err(e) = mode.verify(
                &key.secret_access_key,
                method.as_str(),
                &path,
                &query_pairs,
                &parts.headers,
                &body_bytes,
            ) {
                warn!(
                    "signature mismatch for {} ({} {})",
                    access_key_id, method, path
                );
                return Err(e.into_response());
            }

            debug!("authenticated {} for {} {}", access_key_id, method, path);
            Principal::Key {
                id: key.id,
                access_key_id: key.access_key_id,
            }
        }
        None => {
            // Anonymous access: GET/HEAD on a public-read bucket only
            if method == Method::GET || method == Method::HEAD {
                let bucket_name =
                    percent_decode(path.trim_start_matches('/').split('/').next().unwrap_or(""));
                let public = !bucket_name.is_empty()
                    && matches!(
                        state.db.get_bucket(&bucket_name),
                        Ok(Some(ref b)) if b.acl == BucketAcl::PublicRead
                    );
                if !public {
                    return Err(S3Error::MissingSecurityHeader.into_response());
                }
                debug!("anonymous read on public bucket {}", bucket_name);
                Principal::Anonymous
            } else {
                return Err(S3Error::MissingSecurityHeader.into_response());
            }
        }
    };

    parts.extensions.insert(principal);
    parts.extensions.insert(BufferedBody(body_bytes.clone()));

    let request = Request::from_parts(parts, Body::from(body_bytes));
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_query_pairs() {
        assert_eq!(parse_query_pairs(""), vec![]);
        assert_eq!(
            parse_query_pairs("a=1&b=2"),
            vec![("a".into(), "1".into()), ("b".into(), "2".into())]
        );
        // Bare keys (sub-resource markers) decode to empty values
        assert_eq!(
            parse_query_pairs("location"),
            vec![("location".into(), String::new())]
        );
        // Percent-encoded keys and values decode
        assert_eq!(
            parse_query_pairs("prefix=a%2Fb"),
            vec![("prefix".into(), "a/b".into())]
        );
    }

    #[test]
    fn test_principal_accessors() {
        let anon = Principal::Anonymous;
        assert_eq!(anon.access_key_id(), "anonymous");
        assert_eq!(anon.key_id(), None);

        let key = Principal::Key {
            id: 7,
            access_key_id: "AKIDTEST000000000000".into(),
        };
        assert_eq!(key.access_key_id(), "AKIDTEST000000000000");
        assert_eq!(key.key_id(), Some(7));
    }
}
