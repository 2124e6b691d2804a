// tests/registry_api.rs

//! Registry HTTP surface, driven through the router without a socket.

#![cfg(feature = "server")]

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use base64::Engine as _;
use dopamine::server::db::Db;
use dopamine::server::{auth, routes, AppState, Config, storage::Storage};
use dopamine::services::registry::{PublishResponse, RecipeResource, SearchEntry};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tower::ServiceExt;

const SECRET: &str = "test-secret";

struct TestServer {
    state: Arc<AppState>,
    router: Router,
    _storage_dir: tempfile::TempDir,
}

fn test_server() -> TestServer {
    let storage_dir = tempfile::tempdir().unwrap();
    let config = Config {
        hostname: "127.0.0.1".to_string(),
        port: 0,
        jwt_secret: SECRET.to_string(),
        frontend_origin: None,
        db_connstring: PathBuf::from(":memory:"),
        db_pool_max_size: 1,
        github_client_id: None,
        github_client_secret: None,
        google_client_id: None,
        google_client_secret: None,
        storage_dir: Some(storage_dir.path().to_path_buf()),
        https_cert: None,
        https_key: None,
    };
    let state = Arc::new(AppState {
        config,
        db: Db::open_in_memory().unwrap(),
        storage: Storage::filesystem(storage_dir.path().to_path_buf()).unwrap(),
    });
    TestServer {
        router: routes::create_router(state.clone()),
        state,
        _storage_dir: storage_dir,
    }
}

fn cli_token(server: &TestServer, email: &str) -> String {
    let user = server.state.db.upsert_user(email).unwrap();
    let token = auth::random_token();
    server.state.db.create_cli_token(user.id, &token, None).unwrap();
    token
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>, axum::http::HeaderMap) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec();
    (status, body, headers)
}

fn recipe_archive_bytes(name: &str) -> Vec<u8> {
    let content = tempfile::tempdir().unwrap();
    fs::write(
        content.path().join("dopamine.rhai"),
        format!("let name = \"{name}\";\nlet version = \"1.0.0\";\nfn build(d, c, i) {{}}\n"),
    )
    .unwrap();
    fs::write(content.path().join("README.md"), "# test package\n").unwrap();
    let work = tempfile::tempdir().unwrap();
    let path = work.path().join("a.tar.xz");
    dopamine::archive::create(content.path(), &path).unwrap();
    fs::read(&path).unwrap()
}

fn digest_header(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    format!(
        "sha-256={}",
        base64::engine::general_purpose::STANDARD.encode(digest)
    )
}

async fn announce(
    router: &Router,
    token: &str,
    name: &str,
    version: &str,
    revision: &str,
) -> (StatusCode, Option<PublishResponse>) {
    let body = serde_json::json!({
        "name": name,
        "version": version,
        "revision": revision,
        "description": "a test package",
    });
    let request = Request::builder()
        .method(Method::POST)
        .uri("/v1/packages")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let (status, body, _) = send(router, request).await;
    let parsed = serde_json::from_slice(&body).ok();
    (status, parsed)
}

async fn upload(
    router: &Router,
    bearer: &str,
    data: Vec<u8>,
    digest: &str,
) -> StatusCode {
    let request = Request::builder()
        .method(Method::POST)
        .uri("/archive")
        .header(header::AUTHORIZATION, format!("Bearer {bearer}"))
        .header(header::CONTENT_LENGTH, data.len())
        .header("X-Digest", digest)
        .body(Body::from(data))
        .unwrap();
    let (status, _, _) = send(router, request).await;
    status
}

const REVISION: &str = "00112233aabbccdd";

#[tokio::test]
async fn upload_then_download_round_trip() {
    let server = test_server();
    let token = cli_token(&server, "dev@example.org");
    let data = recipe_archive_bytes("zlib");

    let (status, response) = announce(&server.router, &token, "zlib", "1.0.0", REVISION).await;
    assert_eq!(status, StatusCode::OK);
    let response = response.unwrap();
    assert_eq!(response.archive_name, format!("zlib-1.0.0-{REVISION}.tar.xz"));

    let status = upload(&server.router, &response.upload_bearer, data.clone(), &digest_header(&data)).await;
    assert_eq!(status, StatusCode::OK);

    // full download: bytes identical, digest header on request
    let request = Request::builder()
        .uri(format!("/archive/{}", response.archive_name))
        .header("Want-Digest", "sha-256")
        .body(Body::empty())
        .unwrap();
    let (status, body, headers) = send(&server.router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, data);
    assert_eq!(
        headers.get("Digest").unwrap().to_str().unwrap(),
        digest_header(&data)
    );
    assert!(headers
        .get(header::CONTENT_DISPOSITION)
        .unwrap()
        .to_str()
        .unwrap()
        .contains(&response.archive_name));
    assert_eq!(
        headers.get(header::ACCEPT_RANGES).unwrap().to_str().unwrap(),
        "bytes"
    );

    // download counter incremented
    let archive = server
        .state
        .db
        .archive_by_name(&response.archive_name)
        .unwrap()
        .unwrap();
    assert_eq!(archive.counter, 1);

    // uploaded files were indexed and the recipe script captured
    let recipes = server.state.db.recipes_of_version("zlib", "1.0.0").unwrap();
    assert_eq!(recipes.len(), 1);
    assert_eq!(recipes[0].revision, REVISION);
}

#[tokio::test]
async fn range_requests() {
    let server = test_server();
    let token = cli_token(&server, "dev@example.org");
    let data = recipe_archive_bytes("zlib");
    let (_, response) = announce(&server.router, &token, "zlib", "1.0.0", REVISION).await;
    let response = response.unwrap();
    upload(&server.router, &response.upload_bearer, data.clone(), &digest_header(&data)).await;

    let get_range = |range: &'static str| {
        let uri = format!("/archive/{}", response.archive_name);
        let router = server.router.clone();
        async move {
            let request = Request::builder()
                .uri(uri)
                .header(header::RANGE, range)
                .body(Body::empty())
                .unwrap();
            send(&router, request).await
        }
    };

    // bytes=0- yields the whole body as a partial response
    let (status, body, headers) = get_range("bytes=0-").await;
    assert_eq!(status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(body, data);
    assert_eq!(
        headers.get(header::CONTENT_RANGE).unwrap().to_str().unwrap(),
        format!("bytes 0-{}/{}", data.len() - 1, data.len())
    );

    // a middle slice
    let (status, body, _) = get_range("bytes=4-9").await;
    assert_eq!(status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(body, data[4..=9].to_vec());

    // inverted and overlong ranges and multi-ranges are rejected
    let (status, _, _) = get_range("bytes=9-4").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _, _) = get_range("bytes=0-999999999").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _, _) = get_range("bytes=0-1,3-4").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn upload_with_bad_digest_deletes_provisional_row() {
    let server = test_server();
    let token = cli_token(&server, "dev@example.org");
    let data = recipe_archive_bytes("zlib");
    let (_, response) = announce(&server.router, &token, "zlib", "1.0.0", REVISION).await;
    let response = response.unwrap();

    let lying = digest_header(b"not the real content");
    let status = upload(&server.router, &response.upload_bearer, data, &lying).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // the provisional row is gone: the archive name resolves to nothing
    let request = Request::builder()
        .uri(format!("/archive/{}", response.archive_name))
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = send(&server.router, request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn second_upload_conflicts() {
    let server = test_server();
    let token = cli_token(&server, "dev@example.org");
    let data = recipe_archive_bytes("zlib");
    let (_, response) = announce(&server.router, &token, "zlib", "1.0.0", REVISION).await;
    let response = response.unwrap();
    upload(&server.router, &response.upload_bearer, data.clone(), &digest_header(&data)).await;

    // the bearer still names a finalized archive
    let status = upload(&server.router, &response.upload_bearer, data, &digest_header(b"x")).await;
    assert_eq!(status, StatusCode::CONFLICT);

    // and a new announcement of the same (name, version, revision) conflicts
    let (status, _) = announce(&server.router, &token, "zlib", "1.0.0", REVISION).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn invalid_upload_bearer_is_forbidden() {
    let server = test_server();
    let status = upload(&server.router, "garbage-token", b"data".to_vec(), &digest_header(b"data")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn refresh_token_reuse_revokes_everything() {
    let server = test_server();
    let user = server.state.db.upsert_user("kim@example.org").unwrap();
    let (first, _) = auth::issue_refresh_token(&server.state.db, &user).unwrap();

    let rotate = |token: String| {
        let router = server.router.clone();
        async move {
            let request = Request::builder()
                .method(Method::POST)
                .uri("/auth/token")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    serde_json::json!({ "refreshToken": token }).to_string(),
                ))
                .unwrap();
            send(&router, request).await
        }
    };

    let (status, body, _) = rotate(first.clone()).await;
    assert_eq!(status, StatusCode::OK);
    let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
    let second = parsed["refreshToken"].as_str().unwrap().to_string();
    assert!(parsed["idToken"].as_str().is_some());

    // replaying the consumed token burns the whole session set
    let (status, _, _) = rotate(first).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _, _) = rotate(second).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn cli_token_lifecycle() {
    let server = test_server();
    let token = cli_token(&server, "dev@example.org");

    let request = Request::builder()
        .method(Method::POST)
        .uri("/auth/cli-tokens")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::json!({ "label": "ci" }).to_string()))
        .unwrap();
    let (status, body, _) = send(&server.router, request).await;
    assert_eq!(status, StatusCode::OK);
    let created: serde_json::Value = serde_json::from_slice(&body).unwrap();
    // the token value is revealed exactly once
    assert!(created["token"].as_str().is_some());
    let id = created["id"].as_i64().unwrap();

    let request = Request::builder()
        .uri("/auth/cli-tokens")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    let (status, body, _) = send(&server.router, request).await;
    assert_eq!(status, StatusCode::OK);
    let listed: serde_json::Value = serde_json::from_slice(&body).unwrap();
    let entry = listed
        .as_array()
        .unwrap()
        .iter()
        .find(|e| e["id"].as_i64() == Some(id))
        .unwrap();
    assert!(entry["token"].is_null());

    let request = Request::builder()
        .method(Method::DELETE)
        .uri(format!("/auth/cli-tokens/{id}"))
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = send(&server.router, request).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn search_and_catalog_endpoints() {
    let server = test_server();
    let token = cli_token(&server, "dev@example.org");

    for (name, version, revision) in [
        ("zlib", "1.2.0", "aaaa0000aaaa0000"),
        ("zlib", "1.3.0", "bbbb0000bbbb0000"),
        ("libpng", "1.6.0", "cccc0000cccc0000"),
    ] {
        let data = recipe_archive_bytes(name);
        let (status, response) = announce(&server.router, &token, name, version, revision).await;
        assert_eq!(status, StatusCode::OK);
        let response = response.unwrap();
        let status = upload(&server.router, &response.upload_bearer, data.clone(), &digest_header(&data)).await;
        assert_eq!(status, StatusCode::OK);
    }

    // plain substring search
    let request = Request::builder()
        .uri("/v1/packages?pattern=zli")
        .body(Body::empty())
        .unwrap();
    let (status, body, _) = send(&server.router, request).await;
    assert_eq!(status, StatusCode::OK);
    let entries: Vec<SearchEntry> = serde_json::from_slice(&body).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].name, "zlib");
    assert_eq!(entries[0].last_version, "1.3.0");
    assert!(entries[0].revisions.is_empty());

    // extended with latestOnly trims the revision list to the last version
    let request = Request::builder()
        .uri("/v1/packages?pattern=zlib&extended=true&latestOnly=true")
        .body(Body::empty())
        .unwrap();
    let (_, body, _) = send(&server.router, request).await;
    let entries: Vec<SearchEntry> = serde_json::from_slice(&body).unwrap();
    assert_eq!(entries[0].revisions.len(), 1);
    assert_eq!(entries[0].revisions[0].version, "1.3.0");

    // regex matching
    let request = Request::builder()
        .uri("/v1/packages?pattern=%5El.%2A&regex=true")
        .body(Body::empty())
        .unwrap();
    let (_, body, _) = send(&server.router, request).await;
    let entries: Vec<SearchEntry> = serde_json::from_slice(&body).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].name, "libpng");

    // versions endpoint, ascending
    let request = Request::builder()
        .uri("/v1/packages/zlib/versions")
        .body(Body::empty())
        .unwrap();
    let (status, body, _) = send(&server.router, request).await;
    assert_eq!(status, StatusCode::OK);
    let versions: Vec<String> = serde_json::from_slice(&body).unwrap();
    assert_eq!(versions, vec!["1.2.0".to_string(), "1.3.0".to_string()]);

    let request = Request::builder()
        .uri("/v1/packages/nothere/versions")
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = send(&server.router, request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // recipe resource, pinned and unpinned
    let request = Request::builder()
        .uri("/v1/packages/zlib/recipes/1.2.0?revision=aaaa0000aaaa0000")
        .body(Body::empty())
        .unwrap();
    let (status, body, _) = send(&server.router, request).await;
    assert_eq!(status, StatusCode::OK);
    let resource: RecipeResource = serde_json::from_slice(&body).unwrap();
    assert_eq!(resource.revision, "aaaa0000aaaa0000");
    assert_eq!(resource.archive_name, "zlib-1.2.0-aaaa0000aaaa0000.tar.xz");
    assert!(!resource.sha256.is_empty());
}
