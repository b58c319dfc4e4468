//! Shared fixtures: a scripted origin server and worker builders.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use hashbrown::HashMap;
use http::{HeaderMap, HeaderValue, StatusCode};
use offline_common::WorkerConfig;
use offline_net::{CacheMode, Fetcher, NetError, Request, Response};
use offline_sw::{CacheBackend, ClientNotifier, MemoryBackend, OfflineWorker};
use url::Url;

pub const ORIGIN: &str = "https://docs.example.org/viewer/";
pub const JAN_1: &str = "Wed, 01 Jan 2024 00:00:00 GMT";
pub const JAN_2: &str = "Thu, 02 Jan 2024 00:00:00 GMT";

#[derive(Clone)]
struct Route {
    status: u16,
    headers: Vec<(&'static str, String)>,
    body: String,
}

/// In-memory origin. Unknown paths answer 404; `offline` fails everything.
#[derive(Default)]
pub struct ScriptedOrigin {
    routes: Mutex<HashMap<String, Route>>,
    offline: AtomicBool,
    log: Mutex<Vec<(String, CacheMode)>>,
}

impl ScriptedOrigin {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A fully populated app shell with the given Last-Modified on the document.
    pub fn app_shell(last_modified: Option<&str>) -> Arc<Self> {
        let origin = Self::new();
        origin.set_document("<html>viewer</html>", last_modified);
        for path in [
            "manifest.json",
            "service-worker.js",
            "icons/icon-180.png",
            "icons/icon-192.png",
            "icons/icon-512.png",
            "docs/guide.pdf",
            "docs/release-notes.pdf",
        ] {
            origin.serve(path, &format!("asset {path}"));
        }
        origin
    }

    pub fn serve(&self, path: &str, body: &str) {
        self.route(path, 200, Vec::new(), body);
    }

    pub fn route(&self, path: &str, status: u16, headers: Vec<(&'static str, String)>, body: &str) {
        self.routes.lock().unwrap().insert(
            url(path).to_string(),
            Route {
                status,
                headers,
                body: body.to_string(),
            },
        );
    }

    /// Serve the primary document at both `./` and `./index.html`.
    pub fn set_document(&self, body: &str, last_modified: Option<&str>) {
        let headers: Vec<(&'static str, String)> = last_modified
            .map(|lm| vec![("last-modified", lm.to_string())])
            .unwrap_or_default();
        self.route("", 200, headers.clone(), body);
        self.route("index.html", 200, headers, body);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// URLs requested so far, with their cache modes.
    pub fn requests(&self) -> Vec<(String, CacheMode)> {
        self.log.lock().unwrap().clone()
    }

    pub fn request_count(&self, path: &str) -> usize {
        let wanted = url(path).to_string();
        self.requests().iter().filter(|(u, _)| *u == wanted).count()
    }
}

#[async_trait]
impl Fetcher for ScriptedOrigin {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        self.log
            .lock()
            .unwrap()
            .push((request.url.to_string(), request.cache));
        tokio::task::yield_now().await;

        if self.offline.load(Ordering::SeqCst) {
            return Err(NetError::Offline(request.url.to_string()));
        }

        let mut lookup = request.url.clone();
        lookup.set_query(None);
        let route = self.routes.lock().unwrap().get(lookup.as_str()).cloned();
        let route = route.unwrap_or(Route {
            status: 404,
            headers: Vec::new(),
            body: "not found".to_string(),
        });

        let mut headers = HeaderMap::new();
        for (name, value) in route.headers {
            headers.insert(name, HeaderValue::from_str(&value).unwrap());
        }
        Ok(Response::new(
            request.url.clone(),
            StatusCode::from_u16(route.status).unwrap(),
            headers,
            route.body,
        ))
    }
}

pub fn url(path: &str) -> Url {
    Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

pub fn config(version: &str) -> WorkerConfig {
    WorkerConfig {
        version: version.to_string(),
        ..WorkerConfig::for_origin(Url::parse(ORIGIN).unwrap())
    }
}

pub fn worker(
    config: WorkerConfig,
    backend: &Arc<MemoryBackend>,
    origin: &Arc<ScriptedOrigin>,
    notifier: &ClientNotifier,
) -> Arc<OfflineWorker> {
    let backend: Arc<dyn CacheBackend> = backend.clone();
    let fetcher: Arc<dyn Fetcher> = origin.clone();
    Arc::new(OfflineWorker::new(config, backend, fetcher, notifier.clone()).unwrap())
}

/// Install and activate a fresh worker generation.
pub async fn active_worker(
    config: WorkerConfig,
    backend: &Arc<MemoryBackend>,
    origin: &Arc<ScriptedOrigin>,
    notifier: &ClientNotifier,
) -> Arc<OfflineWorker> {
    let worker = worker(config, backend, origin, notifier);
    worker.install().await.unwrap();
    worker.activate().await.unwrap();
    worker
}
