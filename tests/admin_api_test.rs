//! Admin JSON API tests

mod common;

use common::{TestServer, ADMIN_PASSWORD, ADMIN_SECRET, ADMIN_USER};
use reqwest::StatusCode;
use serde_json::{json, Value};

async fn login(server: &TestServer) -> String {
    let resp = reqwest::Client::new()
        .post(server.url("/admin/auth/login", &[]))
        .json(&json!({"username": ADMIN_USER, "password": ADMIN_PASSWORD}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    body["token"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_login_and_verify() {
    let server = TestServer::spawn_with_admin().await;
    let token = login(&server).await;

    let resp = reqwest::Client::new()
        .post(server.url("/admin/auth/verify", &[]))
        .json(&json!({"token": token}))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["valid"], true);

    let resp = reqwest::Client::new()
        .post(server.url("/admin/auth/verify", &[]))
        .json(&json!({"token": "bogus.token"}))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["valid"], false);
}

#[tokio::test]
async fn test_login_wrong_password() {
    let server = TestServer::spawn_with_admin().await;
    let resp = reqwest::Client::new()
        .post(server.url("/admin/auth/login", &[]))
        .json(&json!({"username": ADMIN_USER, "password": "guess"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_login_rate_limited() {
    let server = TestServer::spawn_with_admin().await;
    let client = reqwest::Client::new();

    for _ in 0..5 {
        let resp = client
            .post(server.url("/admin/auth/login", &[]))
            .json(&json!({"username": ADMIN_USER, "password": "wrong"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    // Sixth attempt within the window: limited, even with the right password
    let resp = client
        .post(server.url("/admin/auth/login", &[]))
        .json(&json!({"username": ADMIN_USER, "password": ADMIN_PASSWORD}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_protected_routes_require_token() {
    let server = TestServer::spawn_with_admin().await;
    let resp = reqwest::Client::new()
        .get(server.url("/admin/keys", &[]))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = reqwest::Client::new()
        .get(server.url("/admin/keys", &[]))
        .header("authorization", "Bearer not.a.token")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_key_crud() {
    let server = TestServer::spawn_with_admin().await;
    let token = login(&server).await;
    let client = reqwest::Client::new();
    let bearer = format!("Bearer {}", token);

    // Create: secret returned exactly once
    let resp = client
        .post(server.url("/admin/keys", &[]))
        .header("authorization", &bearer)
        .json(&json!({"display_name": "ci-uploader"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let created: Value = resp.json().await.unwrap();
    let akid = created["access_key_id"].as_str().unwrap().to_string();
    assert_eq!(akid.len(), 20);
    assert!(akid.starts_with("AK"));
    assert!(created["secret_access_key"].as_str().unwrap().len() >= 30);

    // List: secrets never shown
    let resp = client
        .get(server.url("/admin/keys", &[]))
        .header("authorization", &bearer)
        .send()
        .await
        .unwrap();
    let keys: Value = resp.json().await.unwrap();
    let listed = keys
        .as_array()
        .unwrap()
        .iter()
        .find(|k| k["access_key_id"] == akid.as_str())
        .unwrap();
    assert!(listed.get("secret_access_key").is_none());
    assert_eq!(listed["display_name"], "ci-uploader");

    // Deactivate
    let resp = client
        .patch(server.url(&format!("/admin/keys/{}", akid), &[]))
        .header("authorization", &bearer)
        .json(&json!({"is_active": false}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    let key = server.db.get_access_key(&akid).unwrap().unwrap();
    assert!(!key.is_active);

    // Delete
    let resp = client
        .delete(server.url(&format!("/admin/keys/{}", akid), &[]))
        .header("authorization", &bearer)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert!(server.db.get_access_key(&akid).unwrap().is_none());
}

#[tokio::test]
async fn test_bucket_admin_and_stats() {
    let server = TestServer::spawn_with_admin().await;
    let token = login(&server).await;
    let client = reqwest::Client::new();
    let bearer = format!("Bearer {}", token);

    // Create a bucket owned by the seeded key
    let resp = client
        .post(server.url("/admin/buckets", &[]))
        .header("authorization", &bearer)
        .json(&json!({"name": "admin-made", "owner": common::TEST_ACCESS_KEY}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);

    // Invalid name rejected
    let resp = client
        .post(server.url("/admin/buckets", &[]))
        .header("authorization", &bearer)
        .json(&json!({"name": "NOT-valid"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    // Put an object through the S3 surface, then check stats
    let path = "/admin-made/report.bin";
    let body = b"0123456789";
    common::with_headers(
        client.put(server.url(path, &[])).body(body.to_vec()),
        server.sign("PUT", path, &[], body),
    )
    .send()
    .await
    .unwrap();

    let resp = client
        .get(server.url("/admin/stats", &[]))
        .header("authorization", &bearer)
        .send()
        .await
        .unwrap();
    let stats: Value = resp.json().await.unwrap();
    assert_eq!(stats["buckets"], 1);
    assert_eq!(stats["objects"], 1);
    assert_eq!(stats["total_bytes"], 10);

    // Admin delete purges a non-empty bucket
    let resp = client
        .delete(server.url("/admin/buckets/admin-made", &[]))
        .header("authorization", &bearer)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert!(server.db.get_bucket("admin-made").unwrap().is_none());
}

#[tokio::test]
async fn test_object_listing_and_delete() {
    let server = TestServer::spawn_with_admin().await;
    let token = login(&server).await;
    let client = reqwest::Client::new();
    let bearer = format!("Bearer {}", token);

    client
        .post(server.url("/admin/buckets", &[]))
        .header("authorization", &bearer)
        .json(&json!({"name": "files", "owner": common::TEST_ACCESS_KEY}))
        .send()
        .await
        .unwrap();

    for key in ["a.txt", "b.txt"] {
        let path = format!("/files/{}", key);
        common::with_headers(
            client.put(server.url(&path, &[])).body("x"),
            server.sign("PUT", &path, &[], b"x"),
        )
        .send()
        .await
        .unwrap();
    }

    let resp = client
        .get(server.url("/admin/buckets/files/objects", &[]))
        .header("authorization", &bearer)
        .send()
        .await
        .unwrap();
    let objects: Value = resp.json().await.unwrap();
    assert_eq!(objects.as_array().unwrap().len(), 2);

    let resp = client
        .delete(server.url("/admin/buckets/files/objects/a.txt", &[]))
        .header("authorization", &bearer)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = client
        .get(server.url("/admin/buckets/files/objects", &[]))
        .header("authorization", &bearer)
        .send()
        .await
        .unwrap();
    let objects: Value = resp.json().await.unwrap();
    assert_eq!(objects.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_presigned_link_endpoint() {
    let server = TestServer::spawn_with_admin().await;
    let token = login(&server).await;
    let client = reqwest::Client::new();
    let bearer = format!("Bearer {}", token);

    client
        .post(server.url("/admin/buckets", &[]))
        .header("authorization", &bearer)
        .json(&json!({"name": "shared", "owner": common::TEST_ACCESS_KEY}))
        .send()
        .await
        .unwrap();

    let path = "/shared/doc.pdf";
    let body = b"pdf bytes";
    common::with_headers(
        client.put(server.url(path, &[])).body(body.to_vec()),
        server.sign("PUT", path, &[], body),
    )
    .send()
    .await
    .unwrap();

    let resp = client
        .get(server.url("/admin/buckets/shared/link/doc.pdf", &[]))
        .header("authorization", &bearer)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let link: Value = resp.json().await.unwrap();
    let url = link["url"].as_str().unwrap();
    assert!(url.contains("X-Amz-Signature="));

    // The minted link works without any auth headers
    let resp = client.get(url).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.bytes().await.unwrap().as_ref(), body);

    // Unknown object: 404
    let resp = client
        .get(server.url("/admin/buckets/shared/link/missing.pdf", &[]))
        .header("authorization", &bearer)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

// ADMIN_SECRET is exercised indirectly: tokens minted at login verify
// against it, and tampering is covered by the unit suite.
#[tokio::test]
async fn test_forged_token_rejected() {
    let server = TestServer::spawn_with_admin().await;
    let forged = stashd::api::token::mint(ADMIN_USER, "some-other-secret");
    let resp = reqwest::Client::new()
        .get(server.url("/admin/keys", &[]))
        .header("authorization", format!("Bearer {}", forged))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    // While a token minted with the real secret is accepted
    let good = stashd::api::token::mint(ADMIN_USER, ADMIN_SECRET);
    let resp = reqwest::Client::new()
        .get(server.url("/admin/keys", &[]))
        .header("authorization", format!("Bearer {}", good))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}
