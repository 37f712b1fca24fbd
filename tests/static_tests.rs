mod common;

use cascade_server::{
    create_static_handler, App, AppOptions, CompressionOptions, Method, RawRequest,
    RouteDescription, Router, StaticHandlerOptions,
};
use common::exchange;
use std::fs;
use std::io::Read;
use tempfile::TempDir;

fn site() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("index.html"), "<h1>home</h1>").unwrap();
    fs::write(dir.path().join("style.css"), "body { color: red; }\n".repeat(40)).unwrap();
    fs::write(dir.path().join("data.unknownext"), "raw").unwrap();
    fs::create_dir(dir.path().join("blog")).unwrap();
    fs::write(dir.path().join("blog/index.html"), "<h1>blog</h1>").unwrap();
    fs::create_dir(dir.path().join("empty")).unwrap();
    dir
}

fn app_serving(dir: &TempDir, options: StaticHandlerOptions, app_options: AppOptions) -> App {
    let app = App::new(app_options);
    app.use_handler(create_static_handler(dir.path(), options));
    app
}

fn plain_options() -> StaticHandlerOptions {
    StaticHandlerOptions::default().with_compression(CompressionOptions::disabled())
}

#[tokio::test]
async fn test_directory_serves_default_page() {
    let dir = site();
    let app = app_serving(&dir, plain_options(), AppOptions::default());

    let response = exchange(&app, RawRequest::new(Method::Get, "/")).await;
    assert_eq!(response.status, 200);
    assert_eq!(response.header("content-type"), Some("text/html; charset=utf-8"));
    assert_eq!(response.text(), "<h1>home</h1>");

    let response = exchange(&app, RawRequest::new(Method::Get, "/blog")).await;
    assert_eq!(response.status, 200);
    assert_eq!(response.text(), "<h1>blog</h1>");
}

#[tokio::test]
async fn test_file_with_query_string() {
    let dir = site();
    let app = app_serving(&dir, plain_options(), AppOptions::default());

    let response = exchange(&app, RawRequest::new(Method::Get, "/style.css?v=3")).await;
    assert_eq!(response.status, 200);
    assert!(response.header("content-type").unwrap().starts_with("text/css"));
    assert_eq!(response.text(), "body { color: red; }\n".repeat(40));
}

#[tokio::test]
async fn test_unknown_extension_has_no_content_type() {
    let dir = site();
    let app = app_serving(&dir, plain_options(), AppOptions::default());

    let response = exchange(&app, RawRequest::new(Method::Get, "/data.unknownext")).await;
    assert_eq!(response.status, 200);
    assert_eq!(response.header("content-type"), None);
    assert_eq!(response.text(), "raw");
}

#[tokio::test]
async fn test_missing_file_falls_through() {
    let dir = site();
    let app = app_serving(&dir, plain_options(), AppOptions::default().with_default_code(410));

    for target in ["/missing.txt", "/empty", "/../secret"] {
        let response = exchange(&app, RawRequest::new(Method::Get, target)).await;
        assert_eq!(response.status, 410, "target {}", target);
    }
}

#[tokio::test]
async fn test_terminal_handler_answers_404() {
    let dir = site();
    let app = app_serving(
        &dir,
        plain_options().with_terminal(true),
        AppOptions::default().with_default_code(410),
    );

    let response = exchange(&app, RawRequest::new(Method::Get, "/missing.txt")).await;
    assert_eq!(response.status, 404);
}

#[tokio::test]
async fn test_method_not_served() {
    let dir = site();
    let app = app_serving(&dir, plain_options().with_terminal(true), AppOptions::default().with_default_code(405));

    let response = exchange(&app, RawRequest::new(Method::Post, "/index.html")).await;
    assert_eq!(response.status, 405);

    let response = exchange(&app, RawRequest::new(Method::Head, "/index.html")).await;
    assert_eq!(response.status, 200);
    assert_eq!(response.header("content-type"), Some("text/html; charset=utf-8"));
    assert!(response.body.is_empty());
}

#[tokio::test]
async fn test_no_default_page() {
    let dir = site();
    let app = app_serving(&dir, plain_options().with_default_page(None), AppOptions::default());

    let response = exchange(&app, RawRequest::new(Method::Get, "/")).await;
    assert_eq!(response.status, 404);
}

#[tokio::test]
async fn test_compressed_file() {
    let dir = site();
    let app = app_serving(&dir, StaticHandlerOptions::default(), AppOptions::default());

    let request = RawRequest::new(Method::Get, "/style.css").with_header("Accept-Encoding", "gzip");
    let response = exchange(&app, request).await;
    assert_eq!(response.status, 200);
    assert_eq!(response.header("content-encoding"), Some("gzip"));

    let mut decoded = String::new();
    flate2::read::GzDecoder::new(&response.body[..])
        .read_to_string(&mut decoded)
        .unwrap();
    assert_eq!(decoded, "body { color: red; }\n".repeat(40));
}

#[tokio::test]
async fn test_behind_router() {
    let dir = site();
    let mut router = Router::new();
    router.get(
        RouteDescription::pattern("^/").unwrap(),
        create_static_handler(dir.path(), plain_options()),
    );
    let app = App::default();
    app.use_handler(router.handler());

    let response = exchange(&app, RawRequest::new(Method::Get, "/blog/index.html")).await;
    assert_eq!(response.status, 200);
    assert_eq!(response.text(), "<h1>blog</h1>");
}
