//! One worker generation: install, activate, fetch, message.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use offline_common::WorkerConfig;
use offline_net::{Fetcher, LoaderConfig, Request, ResourceLoader};
use serde_json::Value as JsonValue;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::cache::{CacheStorage, CacheStore};
use crate::clients::ClientNotifier;
use crate::fetch::{FetchMediator, FetchOutcome, PrecacheReport};
use crate::lifecycle::{ExtendableEvent, ServiceWorkerId, ServiceWorkerState};
use crate::messages::{ClientCommand, WorkerMessage};
use crate::metadata::{MetadataRecord, MetadataStore};
use crate::storage::{CacheBackend, DiskBackend};
use crate::{Result, ServiceWorkerError};

/// What install did.
#[derive(Debug)]
pub struct InstallReport {
    pub precache: PrecacheReport,
    /// Data stand change seen while installing, announced on activation.
    pub pending_update: Option<String>,
}

/// What activation did.
#[derive(Debug, Default)]
pub struct ActivationReport {
    /// Superseded generations that were deleted.
    pub purged: Vec<String>,
    /// Clients taken over.
    pub claimed: usize,
    /// `updated` value broadcast to pages, if any.
    pub broadcast: Option<String>,
}

/// A worker instance. Everything it holds lives as long as the generation.
pub struct OfflineWorker {
    id: ServiceWorkerId,
    config: Arc<WorkerConfig>,
    storage: CacheStorage,
    cache: CacheStore,
    metadata: Arc<MetadataStore>,
    notifier: ClientNotifier,
    mediator: FetchMediator,
    state: RwLock<ServiceWorkerState>,
    skip_waiting: AtomicBool,
    pending_update: Mutex<Option<String>>,
}

impl OfflineWorker {
    /// Create a worker for the configured cache generation.
    pub fn new(
        config: WorkerConfig,
        backend: Arc<dyn CacheBackend>,
        fetcher: Arc<dyn Fetcher>,
        notifier: ClientNotifier,
    ) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let storage = CacheStorage::new(backend);
        let cache = storage.handle(&config.cache_name());
        let metadata = Arc::new(MetadataStore::new(cache.clone()));
        let mediator = FetchMediator::new(
            Arc::clone(&config),
            fetcher,
            cache.clone(),
            Arc::clone(&metadata),
            notifier.clone(),
        );

        Ok(Self {
            id: ServiceWorkerId::new(),
            skip_waiting: AtomicBool::new(config.skip_waiting_on_install),
            config,
            storage,
            cache,
            metadata,
            notifier,
            mediator,
            state: RwLock::new(ServiceWorkerState::Parsed),
            pending_update: Mutex::new(None),
        })
    }

    /// Create a worker that keeps its caches under `config.storage_dir()`
    /// and reaches the origin over HTTP.
    pub async fn from_config(config: WorkerConfig, notifier: ClientNotifier) -> Result<Self> {
        config.validate()?;
        let backend = DiskBackend::open(config.storage_dir()).await?;
        let fetcher = ResourceLoader::new(LoaderConfig::default())?;
        Self::new(config, Arc::new(backend), Arc::new(fetcher), notifier)
    }

    pub fn id(&self) -> ServiceWorkerId {
        self.id
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Cache storage shared by every generation.
    pub fn storage(&self) -> &CacheStorage {
        &self.storage
    }

    /// This generation's cache.
    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn metadata(&self) -> &MetadataStore {
        &self.metadata
    }

    pub async fn state(&self) -> ServiceWorkerState {
        *self.state.read().await
    }

    async fn set_state(&self, state: ServiceWorkerState) {
        debug!(worker = self.id.raw(), ?state, "Worker state changed");
        *self.state.write().await = state;
    }

    /// Move from `from` to `to` under one write guard.
    async fn transition(
        &self,
        from: ServiceWorkerState,
        to: ServiceWorkerState,
        action: &str,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        if *state != from {
            return Err(ServiceWorkerError::StateError(format!(
                "cannot {action} from {:?}",
                *state
            )));
        }
        *state = to;
        debug!(worker = self.id.raw(), state = ?to, "Worker state changed");
        Ok(())
    }

    /// Whether this worker should not wait for older pages to go away.
    pub fn skip_waiting_requested(&self) -> bool {
        self.skip_waiting.load(Ordering::SeqCst)
    }

    /// Mark the worker as replaced.
    pub async fn mark_redundant(&self) {
        self.set_state(ServiceWorkerState::Redundant).await;
    }

    // ==================== Install ====================

    /// Preload the app shell and take a first look at the data stand.
    pub async fn install(&self) -> Result<InstallReport> {
        self.transition(
            ServiceWorkerState::Parsed,
            ServiceWorkerState::Installing,
            "install",
        )
        .await?;
        info!(worker = self.id.raw(), cache = %self.cache.name(), "Installing");

        self.storage.open(self.cache.name()).await?;
        if let Err(e) = self.inherit_metadata().await {
            warn!(error = %e, "Data stand of older generations not carried over");
        }
        let precache = self.mediator.precache().await;

        let check = match &precache.primary_document {
            Some(response) => self.mediator.record_primary_document(response).await,
            None => self.mediator.refresh_metadata().await,
        };
        let pending_update = match check {
            Ok(check) if check.changed => Some(check.updated().to_string()),
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "Data stand not recorded during install");
                None
            }
        };
        *self.pending_update.lock().await = pending_update.clone();

        self.set_state(ServiceWorkerState::Installed).await;
        Ok(InstallReport {
            precache,
            pending_update,
        })
    }

    /// Copy the newest data stand of an older generation into this one, so
    /// an unchanged document is not announced as new after a version bump.
    async fn inherit_metadata(&self) -> Result<bool> {
        let current = self.cache.name();
        let mut newest: Option<MetadataRecord> = None;

        for name in self.storage.keys().await? {
            if name == current {
                continue;
            }
            let record = MetadataStore::new(self.storage.handle(&name)).read().await?;
            if record.updated.is_none() {
                continue;
            }
            if newest.as_ref().map_or(true, |n| record.checked > n.checked) {
                newest = Some(record);
            }
        }

        match newest {
            Some(record) => self.metadata.seed(record).await,
            None => Ok(false),
        }
    }

    // ==================== Activate ====================

    /// Drop superseded generations, take over open pages, and tell them
    /// if the data stand moved.
    pub async fn activate(&self) -> Result<ActivationReport> {
        self.transition(
            ServiceWorkerState::Installed,
            ServiceWorkerState::Activating,
            "activate",
        )
        .await?;
        info!(worker = self.id.raw(), cache = %self.cache.name(), "Activating");

        let purged = self.storage.delete_superseded(self.cache.name()).await?;
        let claimed = self.notifier.claim(self.id).await;

        let installed_change = self.pending_update.lock().await.take();
        let refreshed = match self.mediator.refresh_metadata().await {
            Ok(check) => Some(check),
            Err(e) => {
                warn!(error = %e, "Data stand refresh failed during activation");
                None
            }
        };

        let broadcast = match refreshed {
            Some(check) if check.changed => Some(check.updated().to_string()),
            Some(check) if installed_change.is_some() => Some(check.updated().to_string()),
            None => installed_change,
            Some(_) => None,
        };
        if let Some(ref updated) = broadcast {
            self.notifier
                .broadcast(WorkerMessage::updated(updated.clone()))
                .await;
        }

        self.set_state(ServiceWorkerState::Activated).await;
        Ok(ActivationReport {
            purged,
            claimed,
            broadcast,
        })
    }

    /// Activate now if installed; otherwise just remember the request.
    pub async fn skip_waiting(&self) -> Result<()> {
        self.skip_waiting.store(true, Ordering::SeqCst);
        if self.state().await != ServiceWorkerState::Installed {
            return Ok(());
        }
        match self.activate().await {
            Ok(_) => Ok(()),
            // Someone else got there first.
            Err(ServiceWorkerError::StateError(reason)) => {
                debug!(%reason, "Skip waiting raced another activation");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    // ==================== Fetch ====================

    /// Intercept a request. The returned event carries background work the
    /// host should let finish.
    pub async fn fetch(&self, request: Request) -> Result<(FetchOutcome, ExtendableEvent)> {
        let mut event = ExtendableEvent::new();
        if !self.state().await.can_intercept_fetch() {
            return Ok((FetchOutcome::Passthrough, event));
        }
        let outcome = self.mediator.handle_fetch(request, &mut event).await?;
        Ok((outcome, event))
    }

    // ==================== Message ====================

    /// Dispatch a message from a page. `source` is the sending client's id.
    pub fn message(self: &Arc<Self>, data: &JsonValue, source: Option<&str>) -> ExtendableEvent {
        let mut event = ExtendableEvent::new();
        let Some(command) = ClientCommand::from_value(data) else {
            debug!(?data, "Ignoring unknown message");
            return event;
        };
        debug!(?command, source, "Message received");

        let worker = Arc::clone(self);
        let source = source.map(str::to_string);
        match command {
            ClientCommand::SkipWaiting => event.wait_until(async move {
                if let Err(e) = worker.skip_waiting().await {
                    warn!(error = %e, "Skip waiting failed");
                }
            }),
            ClientCommand::GetCacheStatus => event.wait_until(async move {
                worker.reply_status(source.as_deref()).await;
            }),
            ClientCommand::ClearCaches => event.wait_until(async move {
                if let Err(e) = worker.clear_caches().await {
                    warn!(error = %e, "Clearing caches failed");
                }
            }),
        }
        event
    }

    async fn reply_status(&self, source: Option<&str>) {
        let message = match self.metadata.read().await {
            Ok(record) => WorkerMessage::status(record),
            Err(e) => {
                warn!(error = %e, "Cache status unavailable");
                WorkerMessage::status_error()
            }
        };

        let Some(source) = source else {
            debug!("Status requested without a reply target");
            return;
        };
        if let Err(e) = self.notifier.respond(source, message).await {
            warn!(client = source, error = %e, "Status reply not delivered");
        }
    }

    /// Delete every generation, restart the data stand, tell every page.
    pub async fn clear_caches(&self) -> Result<String> {
        let removed = self.storage.delete_all().await?;
        let record = self.metadata.reset(Utc::now()).await?;
        let updated = record.updated.unwrap_or_default();
        info!(removed, updated = %updated, "Caches cleared");

        self.notifier
            .broadcast(WorkerMessage::updated(updated.clone()))
            .await;
        Ok(updated)
    }
}

impl std::fmt::Debug for OfflineWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineWorker")
            .field("id", &self.id)
            .field("cache", &self.cache.name())
            .finish_non_exhaustive()
    }
}
