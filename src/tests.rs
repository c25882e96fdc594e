use crate::archive::tests::{set_mtime, write_zip};
use crate::auth::Credentials;
use crate::config::Config;
use crate::db::Database;
use crate::error::AppError;
use crate::library::{ScanOptions, make_id, scan};
use crate::opds::{self, FeedOptions};
use crate::server::{AppState, ControlClient, Server, ServerState, control_router, create_router};
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use image::{ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::path::Path;
use tower::ServiceExt;

const AKIRA_MTIME: u64 = 1_600_000_000;
const BLAME_MTIME: u64 = 1_700_000_000;

fn png(color: [u8; 3]) -> Vec<u8> {
    let img = RgbImage::from_pixel(8, 12, Rgb(color));
    let mut data = Vec::new();
    img.write_to(&mut Cursor::new(&mut data), ImageFormat::Png)
        .unwrap();
    data
}

fn write_book(path: &Path, cover: &[u8], mtime: u64) {
    write_zip(path, &[("p02.jpg", b"page two"), ("p01.png", cover)]);
    set_mtime(path, mtime);
}

/// Two series: Akira (with author and a stray cover image) and Blame.
fn create_library(root: &Path) {
    let akira = root.join("Akira");
    std::fs::create_dir_all(&akira).unwrap();
    std::fs::write(akira.join("author.txt"), "Katsuhiro Otomo\n").unwrap();
    std::fs::write(akira.join("cover.jpg"), b"not an archive").unwrap();
    write_book(&akira.join("Akira 01.cbz"), &png([255, 0, 0]), AKIRA_MTIME);

    let blame = root.join("Blame");
    std::fs::create_dir_all(&blame).unwrap();
    write_book(&blame.join("Blame 01.cbz"), &png([0, 0, 255]), BLAME_MTIME);
}

fn sync(db: &Database, root: &Path) {
    let snapshot = scan(root, &ScanOptions::default()).unwrap();
    db.populate_catalog(&snapshot).unwrap();
}

fn app_state(root: &Path) -> AppState {
    let mut config = Config::default();
    config.library.root = root.to_path_buf();

    let db = Database::open_memory().unwrap();
    db.add_user("alice", "secret").unwrap();
    sync(&db, root);

    AppState::new(config, db)
}

fn auth_header() -> String {
    Credentials {
        name: "alice".to_string(),
        password: "secret".to_string(),
    }
    .to_header()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::AUTHORIZATION, auth_header())
        .body(Body::empty())
        .unwrap()
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

// ============================================================================
// CATALOG FEEDS
// ============================================================================

#[test]
fn test_catalog_feed_golden() {
    let root = tempfile::tempdir().unwrap();
    create_library(root.path());

    let db = Database::open_memory().unwrap();
    sync(&db, root.path());

    let xml = opds::catalog_feed(&db.list_series().unwrap(), &FeedOptions::default());

    let expected = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom" xmlns:opds="http://opds-spec.org/2010/catalog" xmlns:pse="http://vaemendis.net/opds-pse/ns">
  <id>urn:catalog</id>
  <title>Comics</title>
  <updated>2023-11-14T22:13:20Z</updated>
  <author>
    <name>comic-opds</name>
  </author>
  <link rel="self" href="/api/v1/opds/catalog" type="application/atom+xml;profile=opds-catalog;kind=navigation"/>
  <link rel="start" href="/api/v1/opds/catalog" type="application/atom+xml;profile=opds-catalog;kind=navigation"/>
  <link rel="search" href="/api/v1/opds/search" type="application/opensearchdescription+xml"/>
  <entry>
    <id>urn:series:rxogaPHmjap2Gwpw</id>
    <title>Akira</title>
    <updated>2020-09-13T12:26:40Z</updated>
    <author>
      <name>Katsuhiro Otomo</name>
    </author>
    <link rel="subsection" href="/api/v1/opds/series/rxogaPHmjap2Gwpw" type="application/atom+xml;profile=opds-catalog;kind=acquisition"/>
  </entry>
  <entry>
    <id>urn:series:NSRbZJPP1V6vd1hd</id>
    <title>Blame</title>
    <updated>2023-11-14T22:13:20Z</updated>
    <link rel="subsection" href="/api/v1/opds/series/NSRbZJPP1V6vd1hd" type="application/atom+xml;profile=opds-catalog;kind=acquisition"/>
  </entry>
</feed>"#;

    assert_eq!(xml, expected);
    assert_eq!(db.latest_mod_time().unwrap(), BLAME_MTIME as i64);
}

#[test]
fn test_catalog_feed_is_stable_across_rescans() {
    let root = tempfile::tempdir().unwrap();
    create_library(root.path());

    let db = Database::open_memory().unwrap();
    sync(&db, root.path());
    let first = opds::catalog_feed(&db.list_series().unwrap(), &FeedOptions::default());

    sync(&db, root.path());
    let second = opds::catalog_feed(&db.list_series().unwrap(), &FeedOptions::default());

    assert_eq!(first, second);
}

#[test]
fn test_series_feed_from_scanned_library() {
    let root = tempfile::tempdir().unwrap();
    create_library(root.path());

    let db = Database::open_memory().unwrap();
    sync(&db, root.path());

    let sid = make_id("Akira");
    let series = db.get_series(&sid).unwrap().unwrap();
    let entries = db.list_entries(&sid).unwrap();
    let xml = opds::series_feed(&series, &entries, &FeedOptions::default());

    let doc = roxmltree::Document::parse(&xml).unwrap();
    let entry = doc
        .root_element()
        .children()
        .find(|n| n.has_tag_name("entry"))
        .unwrap();

    let id = entry
        .children()
        .find(|n| n.has_tag_name("id"))
        .and_then(|n| n.text());
    assert_eq!(id, Some("urn:entry:rxogaPHmjap2Gwpw:nY_HfhuF1zV6UnZ9"));

    let author = entry
        .descendants()
        .find(|n| n.has_tag_name("name"))
        .and_then(|n| n.text());
    assert_eq!(author, Some("Katsuhiro Otomo"));

    let stream = entry
        .children()
        .find(|n| {
            n.has_tag_name("link")
                && n.attribute("rel") == Some("http://vaemendis.net/opds-pse/stream")
        })
        .unwrap();
    assert_eq!(
        stream.attribute(("http://vaemendis.net/opds-pse/ns", "count")),
        Some("2")
    );
    assert_eq!(
        stream.attribute("href"),
        Some("/api/v1/opds/series/rxogaPHmjap2Gwpw/entries/nY_HfhuF1zV6UnZ9/page/{pageNumber}")
    );
}

// ============================================================================
// THUMBNAIL CACHE
// ============================================================================

#[test]
fn test_thumbnail_follows_archive_mod_time() {
    let root = tempfile::tempdir().unwrap();
    let series = root.path().join("Akira");
    std::fs::create_dir_all(&series).unwrap();
    let archive = series.join("Akira 01.cbz");
    write_book(&archive, &png([255, 0, 0]), AKIRA_MTIME);

    let db = Database::open_memory().unwrap();
    sync(&db, root.path());
    let (sid, eid) = (make_id("Akira"), make_id("Akira 01"));

    let (red, _) = db.get_thumbnail(&sid, &eid).unwrap();

    // New content, same modification time: the cached copy is served.
    write_book(&archive, &png([0, 0, 255]), AKIRA_MTIME);
    sync(&db, root.path());
    let (cached, _) = db.get_thumbnail(&sid, &eid).unwrap();
    assert_eq!(cached, red);

    // Touching the archive replaces the entry and drops its thumbnail.
    set_mtime(&archive, BLAME_MTIME);
    sync(&db, root.path());
    assert!(db.cached_thumbnail(&sid, &eid).unwrap().is_none());

    let (blue, mime) = db.get_thumbnail(&sid, &eid).unwrap();
    assert_eq!(mime, "image/jpeg");
    assert_ne!(blue, red);

    let pixel = image::load_from_memory(&blue).unwrap().to_rgb8();
    let Rgb([r, _, b]) = *pixel.get_pixel(0, 0);
    assert!(b > 200 && r < 60, "expected a blue thumbnail, got {r}/{b}");
}

// ============================================================================
// PUBLIC ROUTER
// ============================================================================

#[tokio::test]
async fn test_routes_require_credentials() {
    let root = tempfile::tempdir().unwrap();
    create_library(root.path());
    let app = create_router(app_state(root.path()));

    let anonymous = Request::builder()
        .uri("/api/v1/opds/catalog")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(anonymous).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().contains_key(header::WWW_AUTHENTICATE));

    let wrong = Request::builder()
        .uri("/api/v1/opds/catalog")
        .header(
            header::AUTHORIZATION,
            Credentials {
                name: "alice".to_string(),
                password: "nope".to_string(),
            }
            .to_header(),
        )
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(wrong).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app.oneshot(get("/api/v1/opds/catalog")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        opds::NAVIGATION_TYPE
    );
}

#[tokio::test]
async fn test_catalog_search_filters_series() {
    let root = tempfile::tempdir().unwrap();
    create_library(root.path());
    let app = create_router(app_state(root.path()));

    let response = app
        .clone()
        .oneshot(get("/api/v1/opds/catalog?search=blm"))
        .await
        .unwrap();
    let xml = String::from_utf8(body_bytes(response).await).unwrap();
    assert!(xml.contains("<title>Blame</title>"));
    assert!(!xml.contains("<title>Akira</title>"));

    // A blank term is no filter at all.
    let response = app
        .oneshot(get("/api/v1/opds/catalog?search=%20"))
        .await
        .unwrap();
    let xml = String::from_utf8(body_bytes(response).await).unwrap();
    assert!(xml.contains("<title>Blame</title>"));
    assert!(xml.contains("<title>Akira</title>"));
}

#[tokio::test]
async fn test_search_descriptor() {
    let root = tempfile::tempdir().unwrap();
    create_library(root.path());
    let app = create_router(app_state(root.path()));

    let response = app.oneshot(get("/api/v1/opds/search")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        opds::OPENSEARCH_TYPE
    );

    let xml = String::from_utf8(body_bytes(response).await).unwrap();
    assert!(xml.contains("/api/v1/opds/catalog?search={searchTerms}"));
}

#[tokio::test]
async fn test_unknown_series_is_not_found() {
    let root = tempfile::tempdir().unwrap();
    create_library(root.path());
    let app = create_router(app_state(root.path()));

    let response = app
        .clone()
        .oneshot(get("/api/v1/opds/series/unknown"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let uri = format!("/api/v1/opds/series/{}", make_id("Akira"));
    let response = app.oneshot(get(&uri)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        opds::ACQUISITION_TYPE
    );
}

#[tokio::test]
async fn test_page_and_cover_routes() {
    let root = tempfile::tempdir().unwrap();
    create_library(root.path());
    let app = create_router(app_state(root.path()));
    let base = format!(
        "/api/v1/opds/series/{}/entries/{}",
        make_id("Akira"),
        make_id("Akira 01")
    );

    let response = app
        .clone()
        .oneshot(get(&format!("{base}/page/1")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/jpeg");
    assert_eq!(body_bytes(response).await, b"page two");

    let response = app
        .clone()
        .oneshot(get(&format!("{base}/cover")))
        .await
        .unwrap();
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
    assert_eq!(body_bytes(response).await, png([255, 0, 0]));

    let response = app
        .clone()
        .oneshot(get(&format!("{base}/cover?thumbnail=true")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/jpeg");

    // Out-of-range pages surface as retrieval failures.
    let response = app
        .oneshot(get(&format!("{base}/page/2")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_archive_download() {
    let root = tempfile::tempdir().unwrap();
    create_library(root.path());
    let app = create_router(app_state(root.path()));
    let uri = format!(
        "/api/v1/opds/series/{}/entries/{}/archive",
        make_id("Akira"),
        make_id("Akira 01")
    );

    let response = app.oneshot(get(&uri)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/vnd.comicbook+zip"
    );
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename*=UTF-8''Akira%2001.cbz"
    );

    let on_disk = std::fs::read(root.path().join("Akira").join("Akira 01.cbz")).unwrap();
    assert_eq!(body_bytes(response).await, on_disk);
}

// ============================================================================
// CONTROL CHANNEL
// ============================================================================

#[tokio::test]
async fn test_control_user_management() {
    let root = tempfile::tempdir().unwrap();
    create_library(root.path());
    let state = app_state(root.path());
    let db = state.db.clone();
    let app = control_router(state);

    let delete = |name: &str| {
        Request::builder()
            .method("DELETE")
            .uri(format!("/users/{name}"))
            .body(Body::empty())
            .unwrap()
    };

    // The last user cannot be removed.
    let response = app.clone().oneshot(delete("alice")).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let add = Request::builder()
        .method("POST")
        .uri("/users")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"name":"bob","password":"hunter2"}"#))
        .unwrap();
    let response = app.clone().oneshot(add).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    assert!(db.authenticate("bob", "hunter2").unwrap());

    let duplicate = Request::builder()
        .method("POST")
        .uri("/users")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"name":"bob","password":"other"}"#))
        .unwrap();
    let response = app.clone().oneshot(duplicate).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app.clone().oneshot(delete("alice")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app.oneshot(delete("alice")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(db.user_count().unwrap(), 1);
}

#[tokio::test]
async fn test_control_scan_and_dump() {
    let root = tempfile::tempdir().unwrap();
    create_library(root.path());
    let app = control_router(app_state(root.path()));

    let scan = Request::builder()
        .method("POST")
        .uri("/scan")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(scan).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let stats: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(stats["series"], 2);
    assert_eq!(stats["entries"], 2);
    assert_eq!(stats["replaced"], 0);

    let dump = Request::builder().uri("/dump").body(Body::empty()).unwrap();
    let response = app.oneshot(dump).await.unwrap();
    let text = String::from_utf8(body_bytes(response).await).unwrap();
    assert!(text.starts_with("users:\n"));
    assert!(text.contains("title=\"Blame\""));
    assert!(!text.contains("secret"));
}

// ============================================================================
// SERVER LIFECYCLE
// ============================================================================

fn loopback_state(root: &Path) -> AppState {
    let mut state = app_state(root);
    let config = std::sync::Arc::make_mut(&mut state.config);
    config.server.bind = "127.0.0.1:0".parse().unwrap();
    config.server.control_bind = "127.0.0.1:0".parse().unwrap();
    config.scan.interval_seconds = 0;
    config.scan.compaction_interval_seconds = 0;
    state
}

#[tokio::test]
async fn test_server_start_and_stop() {
    let root = tempfile::tempdir().unwrap();
    create_library(root.path());
    let server = Server::new(loopback_state(root.path()));
    assert_eq!(server.state().await, ServerState::NotStarted);

    let addrs = server.start().await.unwrap();
    assert_eq!(server.state().await, ServerState::Running);
    assert_eq!(server.local_addrs().await, Some(addrs));
    assert!(server.start().await.is_err());

    let client = ControlClient::new(format!("http://{}", addrs.control));
    let stats = client.scan().await.unwrap();
    assert_eq!(stats.series, 2);
    assert!(matches!(
        client.delete_user("alice").await,
        Err(AppError::NotEnoughUsers)
    ));
    assert!(matches!(
        client.delete_user("nobody").await,
        Err(AppError::UserNotFound(_))
    ));

    let (first, second) = tokio::join!(server.stop(), server.stop());
    first.unwrap();
    second.unwrap();
    assert_eq!(server.state().await, ServerState::Stopped);

    // Stopping again is a no-op, restarting is refused.
    server.stop().await.unwrap();
    assert!(server.start().await.is_err());
}

#[tokio::test]
async fn test_stop_before_start() {
    let root = tempfile::tempdir().unwrap();
    let server = Server::new(loopback_state(root.path()));

    server.stop().await.unwrap();
    assert_eq!(server.state().await, ServerState::Stopped);
    assert!(server.start().await.is_err());
}

#[tokio::test]
async fn test_server_with_periodic_tasks() {
    let root = tempfile::tempdir().unwrap();
    let mut state = loopback_state(root.path());
    create_library(root.path());
    let config = std::sync::Arc::make_mut(&mut state.config);
    config.scan.interval_seconds = 3600;
    config.scan.compaction_interval_seconds = 3600;
    let db = state.db.clone();
    assert!(db.list_series().unwrap().is_empty());
    let server = Server::new(state);

    server.start().await.unwrap();
    assert_eq!(server.state().await, ServerState::Running);

    // The rescan task ticks once right away.
    let mut scanned = false;
    for _ in 0..100 {
        if db.list_series().unwrap().len() == 2 {
            scanned = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert!(scanned);

    server.stop().await.unwrap();
    assert_eq!(server.state().await, ServerState::Stopped);
}
