// tests/github_checker.rs
use std::sync::Arc;

use wiremock::matchers::{headers, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use modwatch::check::github::GithubChecker;
use modwatch::check::SourceChecker;
use modwatch::watermark::{Section, WatermarkStore};

const LAST_MODIFIED: &str = "Tue, 01 Jul 2025 10:00:00 GMT";

async fn store_in(dir: &tempfile::TempDir) -> Arc<WatermarkStore> {
    Arc::new(WatermarkStore::open(dir.path().join("watermarks.json")).await)
}

#[tokio::test]
async fn new_release_from_empty_watermark_end_to_end() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/acemod/ACE3/releases/latest"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Last-Modified", LAST_MODIFIED)
                .set_body_json(serde_json::json!({ "tag_name": "v3.16.0" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir).await;
    let checker = GithubChecker::new(
        server.uri(),
        vec!["acemod/ACE3".to_string()],
        None,
        Arc::clone(&store),
    );

    let outcome = checker.check().await.unwrap();
    assert!(outcome.changed);
    assert!(outcome.post.contains("acemod/ACE3"));
    assert!(outcome.post.contains("v3.16.0"));

    // The persisted watermark is the Last-Modified header, verbatim.
    let on_disk = std::fs::read_to_string(dir.path().join("watermarks.json")).unwrap();
    let doc: serde_json::Value = serde_json::from_str(&on_disk).unwrap();
    assert_eq!(doc["github"]["acemod/ACE3"], LAST_MODIFIED);
}

#[tokio::test]
async fn unchanged_upstream_reports_no_change_twice() {
    let server = MockServer::start().await;
    // First fetch: a release.
    Mock::given(method("GET"))
        .and(path("/repos/acemod/ACE3/releases/latest"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Last-Modified", LAST_MODIFIED)
                .set_body_json(serde_json::json!({ "tag_name": "v3.16.0" })),
        )
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir).await;
    let checker = GithubChecker::new(
        server.uri(),
        vec!["acemod/ACE3".to_string()],
        None,
        Arc::clone(&store),
    );
    assert!(checker.check().await.unwrap().changed);
    let marks_after_first = store.get(Section::Github).await;

    // Upstream now answers 304 to the conditional request.
    server.reset().await;
    Mock::given(method("GET"))
        .and(path("/repos/acemod/ACE3/releases/latest"))
        // wiremock's header matcher splits incoming values on commas, so the
        // comma-containing date must be given in its split form.
        .and(headers(
            "If-Modified-Since",
            LAST_MODIFIED.split(',').map(str::trim).collect(),
        ))
        .respond_with(ResponseTemplate::new(304))
        .expect(2)
        .mount(&server)
        .await;

    for _ in 0..2 {
        let outcome = checker.check().await.unwrap();
        assert!(!outcome.changed);
        assert!(outcome.post.is_empty());
    }
    assert_eq!(store.get(Section::Github).await, marks_after_first);
}

#[tokio::test]
async fn server_error_is_treated_as_no_change() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir).await;
    let checker = GithubChecker::new(
        server.uri(),
        vec!["acemod/ACE3".to_string()],
        None,
        Arc::clone(&store),
    );

    let outcome = checker.check().await.unwrap();
    assert!(!outcome.changed);
    assert!(store.get(Section::Github).await.is_empty());
}

#[tokio::test]
async fn one_bad_repo_does_not_block_the_others() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/acemod/ACE3/releases/latest"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Last-Modified", LAST_MODIFIED)
                .set_body_json(serde_json::json!({ "tag_name": "v3.16.0" })),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/CBATeam/CBA_A3/releases/latest"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir).await;
    let checker = GithubChecker::new(
        server.uri(),
        vec!["CBATeam/CBA_A3".to_string(), "acemod/ACE3".to_string()],
        None,
        Arc::clone(&store),
    );

    let outcome = checker.check().await.unwrap();
    assert!(outcome.changed);
    assert!(outcome.post.contains("acemod/ACE3"));
    let marks = store.get(Section::Github).await;
    assert!(marks.contains_key("acemod/ACE3"));
    assert!(!marks.contains_key("CBATeam/CBA_A3"));
}
