//! Exercises the full axum stack end to end: router, dispatcher, engine,
//! against a real temporary filesystem tree. No mocks — every request goes
//! through `tower::ServiceExt::oneshot` the same way a client would.

use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Method, Request, StatusCode};
use tower::ServiceExt;

/// A request built directly with `Request::builder()` never carries the
/// `ConnectInfo<SocketAddr>` extension that `axum::serve` would normally
/// inject from the live TCP connection; every test stands one in for it.
fn with_peer(mut req: Request<Body>) -> Request<Body> {
    req.extensions_mut()
        .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 52341))));
    req
}

use wsb_domain::config::Config;
use wsb_engine::locks::LockRegistry;
use wsb_engine::tokens::TokenStore;
use wsb_gateway::api;
use wsb_gateway::state::AppState;

fn make_state(root: &std::path::Path) -> AppState {
    let mut config = Config::default();
    config.app.root = root.display().to_string();
    let locks_dir = root.join(".wsb-locks");
    let tokens_dir = root.join(".wsb-tokens");
    std::fs::create_dir_all(&locks_dir).unwrap();
    std::fs::create_dir_all(&tokens_dir).unwrap();
    AppState {
        config: Arc::new(config),
        root: root.to_path_buf(),
        locks: Arc::new(LockRegistry::new(locks_dir)),
        tokens: Arc::new(TokenStore::new(tokens_dir)),
        theme_static_dirs: Arc::new(Vec::new()),
        auth_open: true,
    }
}

fn app(root: &std::path::Path) -> axum::Router {
    api::router().with_state(make_state(root))
}

async fn acquire_token(router: &axum::Router) -> String {
    let resp = router
        .clone()
        .oneshot(with_peer(
            Request::builder()
                .method(Method::POST)
                .uri("/?a=token")
                .body(Body::empty())
                .unwrap(),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = axum::body::to_bytes(resp.into_body(), 1024 * 1024).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    json["data"]["token"].as_str().unwrap().to_string()
}

fn make_zip(path: &std::path::Path, entries: &[(&str, &[u8])]) {
    let file = std::fs::File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    for (name, data) in entries {
        zip.start_file(*name, zip::write::FileOptions::default()).unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap();
}

#[tokio::test]
async fn view_directory_returns_html_listing_with_cache_control() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("sub")).unwrap();
    std::fs::write(dir.path().join("sub/a.txt"), b"hi").unwrap();
    std::fs::create_dir(dir.path().join("sub/b")).unwrap();

    let router = app(dir.path());
    let resp = router
        .oneshot(with_peer(Request::builder().uri("/sub/").body(Body::empty()).unwrap()))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers().get("cache-control").unwrap(), "no-store");
    assert!(resp.headers().contains_key("last-modified"));
    let body = axum::body::to_bytes(resp.into_body(), 1024 * 1024).await.unwrap();
    let html = String::from_utf8(body.to_vec()).unwrap();
    assert!(html.contains("a.txt"));
    assert!(html.contains(">b<"));
}

#[tokio::test]
async fn directory_without_trailing_slash_redirects() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("sub")).unwrap();

    let router = app(dir.path());
    let resp = router
        .oneshot(with_peer(Request::builder().uri("/sub").body(Body::empty()).unwrap()))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::FOUND);
    let location = resp.headers().get("location").unwrap().to_str().unwrap();
    assert!(location.ends_with("/sub/"));
}

#[tokio::test]
async fn archive_entry_is_streamed_with_etag() {
    let dir = tempfile::tempdir().unwrap();
    make_zip(&dir.path().join("a.zip"), &[("hello.txt", b"hi\n")]);

    let router = app(dir.path());
    let resp = router
        .oneshot(with_peer(
            Request::builder().uri("/a.zip!/hello.txt").body(Body::empty()).unwrap(),
        ))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers().get("etag").is_some());
    let body = axum::body::to_bytes(resp.into_body(), 1024 * 1024).await.unwrap();
    assert_eq!(&body[..], b"hi\n");
}

#[tokio::test]
async fn save_rewrites_one_archive_entry_and_preserves_siblings() {
    let dir = tempfile::tempdir().unwrap();
    let zip_path = dir.path().join("a.zip");
    make_zip(&zip_path, &[("hello.txt", b"old"), ("other.bin", b"xx")]);

    let router = app(dir.path());
    let token = acquire_token(&router).await;

    let resp = router
        .clone()
        .oneshot(with_peer(
            Request::builder()
                .method(Method::POST)
                .uri(format!("/a.zip!/hello.txt?a=save&token={token}"))
                .header("content-type", "application/x-www-form-urlencoded")
                .body(Body::from("text=new"))
                .unwrap(),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    assert_eq!(wsb_engine::archive::read_entry(&zip_path, "hello.txt").unwrap(), b"new");
    assert_eq!(wsb_engine::archive::read_entry(&zip_path, "other.bin").unwrap(), b"xx");
}

#[tokio::test]
async fn deleting_missing_archive_entry_404s_and_leaves_archive_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let zip_path = dir.path().join("a.zip");
    make_zip(&zip_path, &[("hello.txt", b"hi")]);
    let before = std::fs::read(&zip_path).unwrap();

    let router = app(dir.path());
    let token = acquire_token(&router).await;

    let resp = router
        .oneshot(with_peer(
            Request::builder()
                .method(Method::POST)
                .uri(format!("/a.zip!/missing?a=delete&token={token}"))
                .body(Body::empty())
                .unwrap(),
        ))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(std::fs::read(&zip_path).unwrap(), before);
}

#[tokio::test]
async fn second_concurrent_lock_acquisition_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let router = app(dir.path());
    let token_a = acquire_token(&router).await;
    let token_b = acquire_token(&router).await;

    let first = router
        .clone()
        .oneshot(with_peer(
            Request::builder()
                .method(Method::POST)
                .uri(format!("/?a=lock&name=x&chkt=5&token={token_a}"))
                .body(Body::empty())
                .unwrap(),
        ))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::NO_CONTENT);

    let second = router
        .oneshot(with_peer(
            Request::builder()
                .method(Method::POST)
                .uri(format!("/?a=lock&name=x&chkt=1&token={token_b}"))
                .body(Body::empty())
                .unwrap(),
        ))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn mutating_action_without_token_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.txt"), b"hi").unwrap();

    let router = app(dir.path());
    let resp = router
        .oneshot(with_peer(
            Request::builder()
                .method(Method::POST)
                .uri("/a.txt?a=delete")
                .body(Body::empty())
                .unwrap(),
        ))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(dir.path().join("a.txt").exists());
}

#[tokio::test]
async fn mkdir_is_idempotent_through_http() {
    let dir = tempfile::tempdir().unwrap();
    let router = app(dir.path());

    for _ in 0..2 {
        let token = acquire_token(&router).await;
        let resp = router
            .clone()
            .oneshot(with_peer(
                Request::builder()
                    .method(Method::POST)
                    .uri(format!("/newdir?a=mkdir&token={token}"))
                    .body(Body::empty())
                    .unwrap(),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    }
    assert!(dir.path().join("newdir").is_dir());
}

#[tokio::test]
async fn conditional_get_with_matching_etag_returns_304() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();

    let router = app(dir.path());
    let first = router
        .clone()
        .oneshot(with_peer(Request::builder().uri("/a.txt").body(Body::empty()).unwrap()))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    let etag = first.headers().get("etag").unwrap().to_str().unwrap().to_string();

    let second = router
        .oneshot(with_peer(
            Request::builder()
                .uri("/a.txt")
                .header("if-none-match", etag)
                .body(Body::empty())
                .unwrap(),
        ))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::NOT_MODIFIED);
}

#[tokio::test]
async fn range_request_returns_partial_content() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.txt"), b"0123456789").unwrap();

    let router = app(dir.path());
    let resp = router
        .oneshot(with_peer(
            Request::builder()
                .uri("/a.txt")
                .header("range", "bytes=2-4")
                .body(Body::empty())
                .unwrap(),
        ))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(resp.headers().get("content-range").unwrap(), "bytes 2-4/10");
    let body = axum::body::to_bytes(resp.into_body(), 1024).await.unwrap();
    assert_eq!(&body[..], b"234");
}

#[tokio::test]
async fn exec_on_missing_path_404s() {
    let dir = tempfile::tempdir().unwrap();
    let router = app(dir.path());
    let resp = router
        .oneshot(with_peer(
            Request::builder().uri("/missing.txt?a=exec").body(Body::empty()).unwrap(),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn exec_on_existing_path_from_loopback_peer_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.txt"), b"hi").unwrap();
    let router = app(dir.path());
    let resp = router
        .oneshot(with_peer(
            Request::builder().uri("/a.txt?a=exec").body(Body::empty()).unwrap(),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn config_action_reports_is_local_for_loopback_peer() {
    let dir = tempfile::tempdir().unwrap();
    let router = app(dir.path());
    let resp = router
        .oneshot(with_peer(
            Request::builder()
                .uri("/?a=config&format=json")
                .body(Body::empty())
                .unwrap(),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = axum::body::to_bytes(resp.into_body(), 1024 * 1024).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["data"]["app"]["is_local"], true);
}
