//! Presigned URL tests: V4 query auth and legacy V2

mod common;

use chrono::{Duration, Utc};
use common::{with_headers, TestServer, TEST_ACCESS_KEY, TEST_SECRET};
use reqwest::StatusCode;
use stashd::api::sig::v2;
use stashd::api::sig::v4::{presign_url, uri_encode, PresignRequest};

async fn seed_object(server: &TestServer, bucket: &str, key: &str, body: &[u8]) {
    let client = reqwest::Client::new();
    let path = format!("/{}", bucket);
    with_headers(
        client.put(server.url(&path, &[])),
        server.sign("PUT", &path, &[], b""),
    )
    .send()
    .await
    .unwrap();

    let path = format!("/{}/{}", bucket, key);
    let resp = with_headers(
        client.put(server.url(&path, &[])).body(body.to_vec()),
        server.sign("PUT", &path, &[], body),
    )
    .send()
    .await
    .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_v4_presigned_get_valid() {
    let server = TestServer::spawn().await;
    seed_object(&server, "bkt", "shared.txt", b"presigned content").await;

    let url = presign_url(&PresignRequest {
        method: "GET",
        host: &server.host(),
        path: "/bkt/shared.txt",
        access_key_id: TEST_ACCESS_KEY,
        secret_access_key: TEST_SECRET,
        region: "us-east-1",
        expires_secs: 300,
        now: Utc::now(),
    });

    // No auth headers: everything rides in the query string
    let resp = reqwest::Client::new().get(&url).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.text().await.unwrap(), "presigned content");
}

#[tokio::test]
async fn test_v4_presigned_get_expired() {
    let server = TestServer::spawn().await;
    seed_object(&server, "bkt", "shared.txt", b"presigned content").await;

    // Signed two hours ago with a 60-second window
    let url = presign_url(&PresignRequest {
        method: "GET",
        host: &server.host(),
        path: "/bkt/shared.txt",
        access_key_id: TEST_ACCESS_KEY,
        secret_access_key: TEST_SECRET,
        region: "us-east-1",
        expires_secs: 60,
        now: Utc::now() - Duration::hours(2),
    });

    let resp = reqwest::Client::new().get(&url).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert!(resp
        .text()
        .await
        .unwrap()
        .contains("<Code>AccessDenied</Code>"));
}

#[tokio::test]
async fn test_v4_presigned_tampered_signature() {
    let server = TestServer::spawn().await;
    seed_object(&server, "bkt", "shared.txt", b"presigned content").await;

    let url = presign_url(&PresignRequest {
        method: "GET",
        host: &server.host(),
        path: "/bkt/shared.txt",
        access_key_id: TEST_ACCESS_KEY,
        secret_access_key: TEST_SECRET,
        region: "us-east-1",
        expires_secs: 300,
        now: Utc::now(),
    });

    // Flip the final hex digit of the signature
    let tampered = if url.ends_with('0') {
        format!("{}1", &url[..url.len() - 1])
    } else {
        format!("{}0", &url[..url.len() - 1])
    };

    let resp = reqwest::Client::new().get(&tampered).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert!(resp
        .text()
        .await
        .unwrap()
        .contains("<Code>SignatureDoesNotMatch</Code>"));
}

fn v2_url(server: &TestServer, bucket: &str, key: &str, expires: i64, secret: &str) -> String {
    let path = format!("/{}/{}", bucket, key);
    let expires = expires.to_string();
    let string_to_sign = v2::string_to_sign(
        "GET",
        &path,
        &[],
        &axum::http::HeaderMap::new(),
        &expires,
    );
    let signature = v2::sign(secret, &string_to_sign);

    format!(
        "http://{}{}?AWSAccessKeyId={}&Expires={}&Signature={}",
        server.host(),
        path,
        TEST_ACCESS_KEY,
        expires,
        uri_encode(&signature, true)
    )
}

#[tokio::test]
async fn test_v2_presigned_get_valid() {
    let server = TestServer::spawn().await;
    seed_object(&server, "bkt", "legacy.txt", b"v2 content").await;

    let expires = Utc::now().timestamp() + 600;
    let url = v2_url(&server, "bkt", "legacy.txt", expires, TEST_SECRET);

    let resp = reqwest::Client::new().get(&url).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.text().await.unwrap(), "v2 content");
}

#[tokio::test]
async fn test_v2_presigned_get_expired() {
    let server = TestServer::spawn().await;
    seed_object(&server, "bkt", "legacy.txt", b"v2 content").await;

    let expires = Utc::now().timestamp() - 1;
    let url = v2_url(&server, "bkt", "legacy.txt", expires, TEST_SECRET);

    let resp = reqwest::Client::new().get(&url).send().await.unwrap();
    // Expired links consistently answer 403
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert!(resp
        .text()
        .await
        .unwrap()
        .contains("<Code>AccessDenied</Code>"));
}

#[tokio::test]
async fn test_v2_presigned_wrong_secret() {
    let server = TestServer::spawn().await;
    seed_object(&server, "bkt", "legacy.txt", b"v2 content").await;

    let expires = Utc::now().timestamp() + 600;
    let url = v2_url(&server, "bkt", "legacy.txt", expires, "wrong-secret");

    let resp = reqwest::Client::new().get(&url).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert!(resp
        .text()
        .await
        .unwrap()
        .contains("<Code>SignatureDoesNotMatch</Code>"));
}
