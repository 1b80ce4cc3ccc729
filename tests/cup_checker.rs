// tests/cup_checker.rs
use std::sync::Arc;

use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use modwatch::check::cup::CupChecker;
use modwatch::check::SourceChecker;
use modwatch::watermark::{Section, WatermarkStore};

fn page(terrains_version: &str) -> String {
    format!(
        r#"<table class="table">
             <tr><td><b>CUP Terrains - Core</b> {terrains_version}</td><td>mirror</td></tr>
             <tr><td>CUP Weapons 1.17.1</td><td>mirror</td></tr>
           </table>"#
    )
}

#[tokio::test]
async fn version_bump_announces_exactly_that_mod() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(page("1.16.0")))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(WatermarkStore::open(dir.path().join("wm.json")).await);
    let checker = CupChecker::new(server.uri(), Arc::clone(&store));

    // First pass records both mods silently.
    let outcome = checker.check().await.unwrap();
    assert!(!outcome.changed);
    assert_eq!(store.get(Section::Cup).await.len(), 2);

    server.reset().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(page("1.16.1")))
        .mount(&server)
        .await;

    let outcome = checker.check().await.unwrap();
    assert!(outcome.changed);
    assert!(outcome.post.contains("CUP - CUP Terrains - Core"));
    assert!(outcome.post.contains("(1.16.1)"));
    assert!(!outcome.post.contains("Weapons"));
    assert_eq!(
        store.get(Section::Cup).await.get("CUP Terrains - Core"),
        Some(&"1.16.1".to_string())
    );
}

#[tokio::test]
async fn unchanged_page_reports_no_change_twice() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(page("1.16.0")))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(WatermarkStore::open(dir.path().join("wm.json")).await);
    let checker = CupChecker::new(server.uri(), Arc::clone(&store));

    checker.check().await.unwrap();
    let marks = store.get(Section::Cup).await;

    for _ in 0..2 {
        assert!(!checker.check().await.unwrap().changed);
    }
    assert_eq!(store.get(Section::Cup).await, marks);
}

#[tokio::test]
async fn http_error_leaves_watermark_alone() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(WatermarkStore::open(dir.path().join("wm.json")).await);
    let checker = CupChecker::new(server.uri(), Arc::clone(&store));

    assert!(!checker.check().await.unwrap().changed);
    assert!(store.get(Section::Cup).await.is_empty());
}
