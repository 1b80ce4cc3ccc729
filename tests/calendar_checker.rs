// tests/calendar_checker.rs
use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use modwatch::announce::Announcer;
use modwatch::check::calendar::CalendarChecker;
use modwatch::check::SourceChecker;
use modwatch::notify::{MemorySink, MessageSink};
use modwatch::watermark::WatermarkStore;

#[tokio::test]
async fn in_window_event_is_announced_once_and_watermark_advances() {
    let now = Utc::now();
    let soon_start = now + Duration::minutes(45);
    let soon_end = now + Duration::minutes(105);
    let far_start = now + Duration::minutes(180);

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/calendars/ops@example.com/events"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "items": [
                {
                    "summary": "Saturday op",
                    "start": { "dateTime": soon_start.to_rfc3339() },
                    "end": { "dateTime": soon_end.to_rfc3339() }
                },
                {
                    "summary": "Late op",
                    "start": { "dateTime": far_start.to_rfc3339() },
                    "end": { "dateTime": (far_start + Duration::hours(1)).to_rfc3339() }
                }
            ]
        })))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(WatermarkStore::open(dir.path().join("wm.json")).await);
    let sink = Arc::new(MemorySink::new());
    let announcer = Arc::new(Announcer::new(
        Arc::clone(&sink) as Arc<dyn MessageSink>,
        Vec::new(),
        BTreeMap::new(),
        "op_news",
    ));
    let checker = CalendarChecker::new(
        server.uri(),
        "ops@example.com",
        None,
        Arc::clone(&store),
        announcer,
    );

    let outcome = checker.check().await.unwrap();
    assert!(outcome.changed);
    let posts = sink.posts();
    assert_eq!(posts.len(), 1);
    assert!(posts[0].1.contains("# Saturday op"));
    assert_eq!(
        store.calendar_last().await,
        Some(soon_end.to_rfc3339())
    );

    // Same upstream again: the event is already in flight, nothing new.
    let outcome = checker.check().await.unwrap();
    assert!(!outcome.changed);
    assert_eq!(sink.posts().len(), 1);
}

#[tokio::test]
async fn fetch_failure_is_no_change() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(WatermarkStore::open(dir.path().join("wm.json")).await);
    let sink = Arc::new(MemorySink::new());
    let announcer = Arc::new(Announcer::new(
        Arc::clone(&sink) as Arc<dyn MessageSink>,
        Vec::new(),
        BTreeMap::new(),
        "op_news",
    ));
    let checker = CalendarChecker::new(
        server.uri(),
        "ops@example.com",
        None,
        Arc::clone(&store),
        announcer,
    );

    assert!(!checker.check().await.unwrap().changed);
    assert!(sink.posts().is_empty());
    assert_eq!(store.calendar_last().await, None);
}
