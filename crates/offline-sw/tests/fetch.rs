mod common;

use std::sync::Arc;

use common::*;
use http::header::ACCEPT;
use http::{HeaderValue, Method};
use offline_common::AssetStrategy;
use offline_net::{CacheMode, Request};
use offline_sw::{
    ClientNotifier, FetchOutcome, MatchOptions, MemoryBackend, RequestClass, ServiceWorkerError,
    WorkerMessage,
};
use url::Url;

fn body(outcome: &FetchOutcome) -> String {
    outcome.response().expect("a response").text().unwrap()
}

#[test]
fn classification() {
    assert_eq!(
        RequestClass::of(&Request::navigate(url(""))),
        RequestClass::Document
    );
    let html = Request::get(url("about.html")).header(ACCEPT, HeaderValue::from_static("text/html"));
    assert_eq!(RequestClass::of(&html), RequestClass::Document);
    assert_eq!(
        RequestClass::of(&Request::get(url("icons/icon-192.png"))),
        RequestClass::Asset
    );
}

#[tokio::test]
async fn cross_origin_and_non_get_pass_through() {
    let backend = Arc::new(MemoryBackend::new());
    let origin = ScriptedOrigin::app_shell(Some(JAN_1));
    let notifier = ClientNotifier::new();
    let worker = active_worker(config("v1"), &backend, &origin, &notifier).await;
    let before = origin.requests().len();

    let foreign = Request::get(Url::parse("https://cdn.example.com/lib.js").unwrap());
    let (outcome, _) = worker.fetch(foreign).await.unwrap();
    assert!(matches!(outcome, FetchOutcome::Passthrough));

    let post = Request::get(url("api/notes")).method(Method::POST);
    let (outcome, _) = worker.fetch(post).await.unwrap();
    assert!(matches!(outcome, FetchOutcome::Passthrough));

    assert_eq!(origin.requests().len(), before);
}

#[tokio::test]
async fn offline_navigation_serves_cached_primary_document() {
    let backend = Arc::new(MemoryBackend::new());
    let origin = ScriptedOrigin::app_shell(Some(JAN_1));
    let notifier = ClientNotifier::new();
    let worker = active_worker(config("v1"), &backend, &origin, &notifier).await;
    origin.set_offline(true);

    // Deep link never cached: falls back to the primary document.
    let (outcome, _) = worker
        .fetch(Request::navigate(url("reader/chapter-3")))
        .await
        .unwrap();
    assert!(outcome.is_from_cache());
    assert_eq!(body(&outcome), "<html>viewer</html>");

    // Cached navigation target with a different query string.
    let (outcome, _) = worker
        .fetch(Request::navigate(url("index.html?utm=mail")))
        .await
        .unwrap();
    assert!(outcome.is_from_cache());
}

#[tokio::test]
async fn offline_navigation_without_cache_is_a_network_error() {
    let backend = Arc::new(MemoryBackend::new());
    let origin = ScriptedOrigin::app_shell(Some(JAN_1));
    origin.set_offline(true);
    let notifier = ClientNotifier::new();
    let worker = active_worker(config("v1"), &backend, &origin, &notifier).await;

    let (outcome, _) = worker.fetch(Request::navigate(url(""))).await.unwrap();
    assert!(matches!(outcome, FetchOutcome::NetworkError));
}

#[tokio::test]
async fn document_requests_bypass_http_cache_and_update_data_stand() {
    let backend = Arc::new(MemoryBackend::new());
    let origin = ScriptedOrigin::app_shell(Some(JAN_1));
    let notifier = ClientNotifier::new();
    let worker = active_worker(config("v1"), &backend, &origin, &notifier).await;
    let (_, mut tab) = notifier.connect(url("")).await;

    let (outcome, _) = worker.fetch(Request::navigate(url(""))).await.unwrap();
    assert!(!outcome.is_from_cache());
    assert_eq!(
        origin.requests().last().map(|(_, mode)| *mode),
        Some(CacheMode::NoStore)
    );
    assert!(tab.try_recv().is_err());

    origin.set_document("<html>v2</html>", Some(JAN_2));
    let (outcome, _) = worker.fetch(Request::navigate(url(""))).await.unwrap();
    assert_eq!(body(&outcome), "<html>v2</html>");
    assert_eq!(
        tab.try_recv().unwrap(),
        WorkerMessage::updated("2024-01-02T00:00:00.000Z")
    );

    let cached = worker
        .cache()
        .match_request(&url(""), MatchOptions::default())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cached.body, b"<html>v2</html>");
}

#[tokio::test]
async fn secondary_pages_leave_the_data_stand_alone() {
    let backend = Arc::new(MemoryBackend::new());
    let origin = ScriptedOrigin::app_shell(Some(JAN_1));
    let notifier = ClientNotifier::new();
    let worker = active_worker(config("v1"), &backend, &origin, &notifier).await;
    let before = worker.metadata().read().await.unwrap();
    let (_, mut tab) = notifier.connect(url("")).await;

    origin.route(
        "help.html",
        200,
        vec![("last-modified", JAN_2.to_string())],
        "<html>help</html>",
    );
    let (outcome, _) = worker.fetch(Request::navigate(url("help.html"))).await.unwrap();
    assert_eq!(body(&outcome), "<html>help</html>");
    assert!(tab.try_recv().is_err());
    assert_eq!(worker.metadata().read().await.unwrap(), before);

    // Still cached for offline use.
    assert!(worker
        .cache()
        .match_request(&url("help.html"), MatchOptions::default())
        .await
        .unwrap()
        .is_some());

    // The primary document with its unchanged header stays silent too.
    let (outcome, _) = worker
        .fetch(Request::navigate(url("index.html?from=help")))
        .await
        .unwrap();
    assert!(!outcome.is_from_cache());
    assert!(tab.try_recv().is_err());
    let after = worker.metadata().read().await.unwrap();
    assert_eq!(after.updated.as_deref(), Some("2024-01-01T00:00:00.000Z"));
}

#[tokio::test]
async fn failed_document_status_is_not_cached() {
    let backend = Arc::new(MemoryBackend::new());
    let origin = ScriptedOrigin::app_shell(Some(JAN_1));
    let notifier = ClientNotifier::new();
    let worker = active_worker(config("v1"), &backend, &origin, &notifier).await;

    let (outcome, _) = worker
        .fetch(Request::navigate(url("missing.html")))
        .await
        .unwrap();
    assert_eq!(outcome.response().unwrap().status.as_u16(), 404);
    assert!(worker
        .cache()
        .match_request(&url("missing.html"), MatchOptions::default())
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn repeated_fetches_keep_the_last_response() {
    let backend = Arc::new(MemoryBackend::new());
    let origin = ScriptedOrigin::app_shell(Some(JAN_1));
    let notifier = ClientNotifier::new();
    let worker = active_worker(config("v1"), &backend, &origin, &notifier).await;

    for n in 1..=5 {
        origin.serve("docs/guide.pdf", &format!("revision {n}"));
        let (outcome, _) = worker.fetch(Request::get(url("docs/guide.pdf"))).await.unwrap();
        assert_eq!(body(&outcome), format!("revision {n}"));
    }

    let cached = worker
        .cache()
        .match_request(&url("docs/guide.pdf"), MatchOptions::default())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cached.body, b"revision 5");
}

#[tokio::test]
async fn network_first_asset_falls_back_to_cache() {
    let backend = Arc::new(MemoryBackend::new());
    let origin = ScriptedOrigin::app_shell(Some(JAN_1));
    let notifier = ClientNotifier::new();
    let worker = active_worker(config("v1"), &backend, &origin, &notifier).await;
    origin.set_offline(true);

    let (outcome, _) = worker
        .fetch(Request::get(url("manifest.json?v=3")))
        .await
        .unwrap();
    assert!(outcome.is_from_cache());
    assert_eq!(body(&outcome), "asset manifest.json");

    let (outcome, _) = worker.fetch(Request::get(url("never-seen.css"))).await.unwrap();
    assert!(matches!(outcome, FetchOutcome::NetworkError));
}

#[tokio::test]
async fn cache_first_serves_hit_and_refreshes_in_background() {
    let backend = Arc::new(MemoryBackend::new());
    let origin = ScriptedOrigin::app_shell(Some(JAN_1));
    let notifier = ClientNotifier::new();
    let mut config = config("v1");
    config.asset_strategy = AssetStrategy::CacheFirst;
    let worker = active_worker(config, &backend, &origin, &notifier).await;

    origin.serve("manifest.json", "manifest v2");
    let (outcome, event) = worker.fetch(Request::get(url("manifest.json"))).await.unwrap();
    assert!(outcome.is_from_cache());
    assert_eq!(body(&outcome), "asset manifest.json");
    assert_eq!(event.settle().await, 1);

    let (outcome, event) = worker.fetch(Request::get(url("manifest.json"))).await.unwrap();
    assert_eq!(body(&outcome), "manifest v2");
    event.settle().await;

    // A miss goes to the network and is stored.
    origin.serve("styles/reader.css", "css");
    let (outcome, event) = worker
        .fetch(Request::get(url("styles/reader.css")))
        .await
        .unwrap();
    assert!(!outcome.is_from_cache());
    assert_eq!(event.pending(), 0);
    assert!(worker
        .cache()
        .match_request(&url("styles/reader.css"), MatchOptions::default())
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn storage_failure_surfaces_on_the_serving_path() {
    // Big enough for the shell, too small for the large attachment.
    let backend = Arc::new(MemoryBackend::with_quota(4096));
    let origin = ScriptedOrigin::app_shell(Some(JAN_1));
    let notifier = ClientNotifier::new();
    let worker = active_worker(config("v1"), &backend, &origin, &notifier).await;

    origin.serve("docs/large.pdf", &"x".repeat(8192));
    let result = worker.fetch(Request::get(url("docs/large.pdf"))).await;
    assert!(matches!(result, Err(ServiceWorkerError::Storage(_))));
}
