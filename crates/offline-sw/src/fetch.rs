//! Fetch mediation: cache vs. network for every intercepted request.
//!
//! Documents go to the network first with transport caches bypassed, since
//! their response also drives the data stand. Assets follow the configured
//! [`AssetStrategy`]. Whatever the policy, a successful network response is
//! written to the cache before it is handed back.

use std::sync::Arc;

use chrono::Utc;
use http::Method;
use offline_common::{AssetStrategy, WorkerConfig};
use offline_net::{CacheMode, Fetcher, Request, Response};
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::cache::{without_search, CacheStore, MatchOptions};
use crate::clients::ClientNotifier;
use crate::lifecycle::ExtendableEvent;
use crate::messages::WorkerMessage;
use crate::metadata::{MetadataCheck, MetadataStore};
use crate::{Result, ServiceWorkerError};

/// How a request is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    /// Navigation or HTML.
    Document,
    /// Everything else.
    Asset,
}

impl RequestClass {
    pub fn of(request: &Request) -> Self {
        if request.is_navigation() || request.accepts_html() {
            RequestClass::Document
        } else {
            RequestClass::Asset
        }
    }
}

/// What the page gets back.
#[derive(Debug)]
pub enum FetchOutcome {
    /// Not ours; the host performs the request normally.
    Passthrough,
    /// A response, fresh or cached.
    Response { response: Response, from_cache: bool },
    /// Network failed and nothing usable was cached.
    NetworkError,
}

impl FetchOutcome {
    pub fn response(&self) -> Option<&Response> {
        match self {
            FetchOutcome::Response { response, .. } => Some(response),
            _ => None,
        }
    }

    pub fn is_from_cache(&self) -> bool {
        matches!(self, FetchOutcome::Response { from_cache: true, .. })
    }

    fn network(response: Response) -> Self {
        FetchOutcome::Response {
            response,
            from_cache: false,
        }
    }

    fn cached(response: Response) -> Self {
        FetchOutcome::Response {
            response,
            from_cache: true,
        }
    }
}

/// Result of the install-time preload.
#[derive(Debug, Default)]
pub struct PrecacheReport {
    pub stored: Vec<Url>,
    pub failed: Vec<String>,
    /// The primary document, when it was part of the manifest and loaded.
    pub primary_document: Option<Response>,
}

/// Applies the caching policy to intercepted requests.
#[derive(Clone)]
pub struct FetchMediator {
    config: Arc<WorkerConfig>,
    fetcher: Arc<dyn Fetcher>,
    cache: CacheStore,
    metadata: Arc<MetadataStore>,
    notifier: ClientNotifier,
}

impl FetchMediator {
    pub fn new(
        config: Arc<WorkerConfig>,
        fetcher: Arc<dyn Fetcher>,
        cache: CacheStore,
        metadata: Arc<MetadataStore>,
        notifier: ClientNotifier,
    ) -> Self {
        Self {
            config,
            fetcher,
            cache,
            metadata,
            notifier,
        }
    }

    /// Handle one intercepted request. Background work (cache-first
    /// refreshes) is registered on `event`.
    pub async fn handle_fetch(
        &self,
        request: Request,
        event: &mut ExtendableEvent,
    ) -> Result<FetchOutcome> {
        if request.method != Method::GET || !self.config.is_same_origin(&request.url) {
            trace!(url = %request.url, method = %request.method, "Passing request through");
            return Ok(FetchOutcome::Passthrough);
        }

        match RequestClass::of(&request) {
            RequestClass::Document => self.handle_document(request).await,
            RequestClass::Asset => match self.config.asset_strategy {
                AssetStrategy::NetworkFirst => self.handle_asset_network_first(request).await,
                AssetStrategy::CacheFirst => self.handle_asset_cache_first(request, event).await,
            },
        }
    }

    async fn handle_document(&self, request: Request) -> Result<FetchOutcome> {
        let network_request = request.clone().cache(CacheMode::NoStore);
        match self.fetcher.fetch(&network_request).await {
            Ok(response) if response.ok() => {
                self.store(&request, &response).await?;
                if self.is_primary_document(&request.url) {
                    self.check_and_broadcast(&response).await;
                }
                Ok(FetchOutcome::network(response))
            }
            Ok(response) => {
                debug!(url = %request.url, status = %response.status, "Document not cached");
                Ok(FetchOutcome::network(response))
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Document fetch failed, trying cache");
                self.document_fallback(&request).await
            }
        }
    }

    /// Only the primary document (or the scope root serving it) drives the
    /// data stand; other pages are cached without touching it.
    fn is_primary_document(&self, url: &Url) -> bool {
        let wanted = without_search(url);
        if wanted == without_search(&self.config.origin) {
            return true;
        }
        self.config
            .primary_document_url()
            .map(|primary| without_search(&primary) == wanted)
            .unwrap_or(false)
    }

    async fn document_fallback(&self, request: &Request) -> Result<FetchOutcome> {
        if let Some(entry) = self
            .cache
            .match_request(&request.url, MatchOptions::ignore_search())
            .await?
        {
            return Ok(FetchOutcome::cached(entry.to_response()?));
        }

        let primary = self.config.primary_document_url()?;
        if let Some(entry) = self
            .cache
            .match_request(&primary, MatchOptions::default())
            .await?
        {
            info!(url = %request.url, "Serving cached primary document while offline");
            return Ok(FetchOutcome::cached(entry.to_response()?));
        }

        warn!(url = %request.url, "Offline with no cached document");
        Ok(FetchOutcome::NetworkError)
    }

    async fn handle_asset_network_first(&self, request: Request) -> Result<FetchOutcome> {
        match self.fetcher.fetch(&request).await {
            Ok(response) => {
                if response.ok() {
                    self.store(&request, &response).await?;
                }
                Ok(FetchOutcome::network(response))
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Asset fetch failed, trying cache");
                match self
                    .cache
                    .match_request(&request.url, MatchOptions::ignore_search())
                    .await?
                {
                    Some(entry) => Ok(FetchOutcome::cached(entry.to_response()?)),
                    None => Ok(FetchOutcome::NetworkError),
                }
            }
        }
    }

    async fn handle_asset_cache_first(
        &self,
        request: Request,
        event: &mut ExtendableEvent,
    ) -> Result<FetchOutcome> {
        let Some(entry) = self
            .cache
            .match_request(&request.url, MatchOptions::ignore_search())
            .await?
        else {
            return match self.fetcher.fetch(&request).await {
                Ok(response) => {
                    if response.ok() {
                        self.store(&request, &response).await?;
                    }
                    Ok(FetchOutcome::network(response))
                }
                Err(e) => {
                    debug!(url = %request.url, error = %e, "Asset fetch failed with empty cache");
                    Ok(FetchOutcome::NetworkError)
                }
            };
        };

        let fetcher = Arc::clone(&self.fetcher);
        let cache = self.cache.clone();
        let refresh = request.clone();
        event.wait_until(async move {
            match fetcher.fetch(&refresh).await {
                Ok(response) if response.ok() => {
                    if let Err(e) = cache.put_response(&refresh, &response).await {
                        warn!(url = %refresh.url, error = %e, "Background refresh not stored");
                    }
                }
                Ok(response) => {
                    debug!(url = %refresh.url, status = %response.status, "Background refresh skipped");
                }
                Err(e) => debug!(url = %refresh.url, error = %e, "Background refresh failed"),
            }
        });

        Ok(FetchOutcome::cached(entry.to_response()?))
    }

    /// Write a response to the cache. The write runs as its own task so it
    /// completes even if the request handler is dropped.
    async fn store(&self, request: &Request, response: &Response) -> Result<()> {
        let cache = self.cache.clone();
        let request = request.clone();
        let response = response.clone();
        tokio::spawn(async move { cache.put_response(&request, &response).await })
            .await
            .map_err(|e| ServiceWorkerError::storage(format!("cache write aborted: {e}")))?
    }

    async fn check_and_broadcast(&self, response: &Response) -> Option<MetadataCheck> {
        match self.metadata.record_check(response.last_modified(), Utc::now()).await {
            Ok(check) => {
                if check.changed {
                    self.notifier
                        .broadcast(WorkerMessage::updated(check.updated()))
                        .await;
                }
                Some(check)
            }
            Err(e) => {
                warn!(error = %e, "Metadata check failed");
                None
            }
        }
    }

    /// Fetch every manifest entry past the HTTP cache and store what loads.
    pub async fn precache(&self) -> PrecacheReport {
        let mut report = PrecacheReport::default();
        let primary = self.config.primary_document_url().ok();

        for path in &self.config.precache {
            let url = match self.config.resolve(path) {
                Ok(url) => url,
                Err(e) => {
                    warn!(path, error = %e, "Skipping unresolvable precache entry");
                    report.failed.push(path.clone());
                    continue;
                }
            };

            let request = Request::get(url.clone()).cache(CacheMode::Reload);
            let response = match self.fetcher.fetch(&request).await {
                Ok(response) if response.ok() => response,
                Ok(response) => {
                    warn!(url = %url, status = %response.status, "Precache entry not stored");
                    report.failed.push(path.clone());
                    continue;
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "Precache fetch failed");
                    report.failed.push(path.clone());
                    continue;
                }
            };

            if let Err(e) = self.cache.put_response(&request, &response).await {
                warn!(url = %url, error = %e, "Precache write failed");
                report.failed.push(path.clone());
                continue;
            }

            if primary.as_ref() == Some(&url) {
                report.primary_document = Some(response);
            }
            report.stored.push(url);
        }

        info!(
            stored = report.stored.len(),
            failed = report.failed.len(),
            "Precache finished"
        );
        report
    }

    /// Check the primary document on the network and update the data stand.
    /// Offline, the stored record is kept.
    pub async fn refresh_metadata(&self) -> Result<MetadataCheck> {
        let url = self.config.primary_document_url()?;
        let request = Request::get(url).cache(CacheMode::NoStore);

        match self.fetcher.fetch(&request).await {
            Ok(response) if response.ok() => {
                if let Err(e) = self.store(&request, &response).await {
                    warn!(error = %e, "Primary document refresh not stored");
                }
                self.metadata
                    .record_check(response.last_modified(), Utc::now())
                    .await
            }
            Ok(response) => {
                warn!(status = %response.status, "Primary document check failed");
                self.metadata.record_offline(Utc::now()).await
            }
            Err(e) => {
                debug!(error = %e, "Primary document unreachable");
                self.metadata.record_offline(Utc::now()).await
            }
        }
    }

    /// Record a primary document loaded elsewhere (e.g. by the preload).
    pub async fn record_primary_document(&self, response: &Response) -> Result<MetadataCheck> {
        self.metadata
            .record_check(response.last_modified(), Utc::now())
            .await
    }
}

impl std::fmt::Debug for FetchMediator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchMediator")
            .field("cache", &self.cache)
            .field("asset_strategy", &self.config.asset_strategy)
            .finish_non_exhaustive()
    }
}
