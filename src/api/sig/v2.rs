//! Legacy AWS Signature Version 2 presigned-URL verification
//!
//! Older SDKs and share-link tools still generate V2 query-string auth:
//! `?AWSAccessKeyId=...&Expires=...&Signature=...` with an HMAC-SHA1
//! signature over METHOD, Content-MD5, Content-Type, Expires, the
//! canonicalized x-amz headers and the canonicalized resource.

use axum::http::HeaderMap;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use tracing::debug;

use super::ct_eq;
use crate::api::S3Error;

type HmacSha1 = Hmac<Sha1>;

/// Sub-resources that participate in the V2 canonicalized resource,
/// per the 2006-03-01 signing rules.
const SIGNED_SUBRESOURCES: &[&str] = &[
    "acl",
    "cors",
    "delete",
    "lifecycle",
    "location",
    "logging",
    "notification",
    "partNumber",
    "policy",
    "replication",
    "requestPayment",
    "restore",
    "tagging",
    "torrent",
    "uploadId",
    "uploads",
    "versionId",
    "versioning",
    "versions",
    "website",
];

/// SigV2 presigned query parameters.
#[derive(Debug, Clone)]
pub struct V2Params {
    pub access_key: String,
    pub signature: String,
    /// Unix timestamp (seconds)
    pub expires: String,
}

impl V2Params {
    pub fn from_query(query_pairs: &[(String, String)]) -> Result<Self, S3Error> {
        let get = |name: &str| {
            query_pairs
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.clone())
        };

        let access_key = get("AWSAccessKeyId").unwrap_or_default();
        let signature = get("Signature").unwrap_or_default();
        let expires = get("Expires").unwrap_or_default();

        if access_key.is_empty() || signature.is_empty() {
            return Err(S3Error::AccessDenied);
        }

        Ok(V2Params {
            access_key,
            signature,
            expires,
        })
    }
}

/// Verify a V2 presigned request. The expiry check fires before the
/// signature comparison, so an expired link is always AccessDenied.
pub fn verify(
    params: &V2Params,
    secret: &str,
    method: &str,
    path: &str,
    query_pairs: &[(String, String)],
    headers: &HeaderMap,
) -> Result<(), S3Error> {
    let expires_secs: i64 = params
        .expires
        .parse()
        .map_err(|_| S3Error::InvalidArgument(format!("Invalid Expires: {}", params.expires)))?;

    if Utc::now().timestamp() > expires_secs {
        debug!("V2 presigned URL expired at {}", expires_secs);
        return Err(S3Error::AccessDenied);
    }

    // The canonicalized resource is built over the decoded path
    let decoded_path = super::v4::percent_decode(path);
    let string_to_sign = string_to_sign(method, &decoded_path, query_pairs, headers, &params.expires);
    let computed = sign(secret, &string_to_sign);

    if !ct_eq(computed.as_bytes(), params.signature.as_bytes()) {
        return Err(S3Error::SignatureDoesNotMatch);
    }
    Ok(())
}

/// base64(HMAC-SHA1(secret, string_to_sign))
pub fn sign(secret: &str, string_to_sign: &str) -> String {
    use base64::Engine;
    let mut mac = HmacSha1::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(string_to_sign.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
}

/// Build the V2 string to sign:
/// `METHOD\nContent-MD5\nContent-Type\nExpires\n` + amz headers + resource.
pub fn string_to_sign(
    method: &str,
    path: &str,
    query_pairs: &[(String, String)],
    headers: &HeaderMap,
    expires: &str,
) -> String {
    let content_md5 = headers
        .get("content-md5")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let content_type = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    format!(
        "{}\n{}\n{}\n{}\n{}{}",
        method,
        content_md5,
        content_type,
        expires,
        canonicalized_amz_headers(headers),
        canonicalized_resource(path, query_pairs)
    )
}

/// Lowercased, sorted `x-amz-*` headers, each as `name:value\n`.
fn canonicalized_amz_headers(headers: &HeaderMap) -> String {
    let mut amz: Vec<(String, String)> = headers
        .iter()
        .filter_map(|(name, value)| {
            let name = name.as_str().to_ascii_lowercase();
            if name.starts_with("x-amz-") {
                value.to_str().ok().map(|v| (name, v.trim().to_string()))
            } else {
                None
            }
        })
        .collect();
    amz.sort_by(|a, b| a.0.cmp(&b.0));

    amz.iter()
        .map(|(k, v)| format!("{}:{}\n", k, v))
        .collect()
}

/// The decoded path plus the signed sub-resource subset of the query,
/// sorted, joined by `&`, with bare keys for empty values.
fn canonicalized_resource(path: &str, query_pairs: &[(String, String)]) -> String {
    let mut sub: Vec<&(String, String)> = query_pairs
        .iter()
        .filter(|(k, _)| SIGNED_SUBRESOURCES.contains(&k.as_str()))
        .collect();
    sub.sort_by(|a, b| a.0.cmp(&b.0));

    if sub.is_empty() {
        return path.to_string();
    }

    let joined = sub
        .iter()
        .map(|(k, v)| {
            if v.is_empty() {
                k.clone()
            } else {
                format!("{}={}", k, v)
            }
        })
        .collect::<Vec<_>>()
        .join("&");

    format!("{}?{}", path, joined)
}
