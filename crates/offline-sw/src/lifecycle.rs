//! Worker lifecycle: states, lifetime extension, and registration.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::worker::OfflineWorker;
use crate::Result;

// ==================== Types ====================

/// Unique identifier for a worker instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceWorkerId(u64);

impl ServiceWorkerId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for ServiceWorkerId {
    fn default() -> Self {
        Self::new()
    }
}

/// Service worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ServiceWorkerState {
    /// Created, install not started.
    #[default]
    Parsed,
    /// Installing (precache running).
    Installing,
    /// Installed but waiting for activation.
    Installed,
    /// Activating (cleanup, claim, metadata refresh).
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Replaced by a newer worker.
    Redundant,
}

impl ServiceWorkerState {
    /// Whether fetches are intercepted in this state.
    pub fn can_intercept_fetch(&self) -> bool {
        matches!(self, ServiceWorkerState::Activated)
    }
}

// ==================== Extendable Event ====================

/// Keeps the worker alive until work registered with
/// [`wait_until`](Self::wait_until) completes.
///
/// Work is spawned immediately, so it keeps running even if whoever
/// dispatched the event stops waiting for it.
#[derive(Debug, Default)]
pub struct ExtendableEvent {
    pending: Vec<JoinHandle<()>>,
}

impl ExtendableEvent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extend the event's lifetime until `work` completes.
    pub fn wait_until<F>(&mut self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.pending.push(tokio::spawn(work));
    }

    /// Number of registered tasks.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Wait for every registered task. Returns how many finished cleanly.
    pub async fn settle(self) -> usize {
        let mut finished = 0;
        for handle in self.pending {
            match handle.await {
                Ok(()) => finished += 1,
                Err(e) => warn!(error = %e, "Extended work did not finish"),
            }
        }
        finished
    }
}

// ==================== Registration ====================

/// The worker generations installed for one scope.
#[derive(Debug)]
pub struct Registration {
    /// Scope URL.
    pub scope: Url,

    /// Installed but not active.
    waiting: Option<Arc<OfflineWorker>>,

    /// Active worker.
    active: Option<Arc<OfflineWorker>>,
}

impl Registration {
    /// Create a new registration.
    pub fn new(scope: Url) -> Self {
        Self {
            scope,
            waiting: None,
            active: None,
        }
    }

    /// Install a new worker generation. It activates right away when nothing
    /// is active yet or when it asked to skip waiting; otherwise it waits.
    pub async fn update(&mut self, worker: Arc<OfflineWorker>) -> Result<()> {
        info!(scope = %self.scope, worker = worker.id().raw(), "Installing new worker");
        if let Err(e) = worker.install().await {
            worker.mark_redundant().await;
            return Err(e);
        }

        if let Some(previous) = self.waiting.replace(worker) {
            previous.mark_redundant().await;
        }

        let skip = match &self.waiting {
            Some(waiting) => waiting.skip_waiting_requested(),
            None => false,
        };
        if self.active.is_none() || skip {
            self.activate_waiting().await?;
        }
        Ok(())
    }

    /// Promote the waiting worker. Returns `false` if none was waiting.
    pub async fn activate_waiting(&mut self) -> Result<bool> {
        let Some(worker) = self.waiting.take() else {
            return Ok(false);
        };

        if !worker.state().await.can_intercept_fetch() {
            worker.activate().await?;
        }
        if let Some(old) = self.active.replace(worker) {
            old.mark_redundant().await;
        }
        Ok(true)
    }

    /// Active worker, promoting a waiting worker that activated itself.
    pub async fn active(&mut self) -> Option<Arc<OfflineWorker>> {
        let promoted = match &self.waiting {
            Some(waiting) => waiting.state().await.can_intercept_fetch(),
            None => false,
        };
        if promoted {
            debug!(scope = %self.scope, "Waiting worker activated itself");
            if let Err(e) = self.activate_waiting().await {
                warn!(error = %e, "Failed to promote waiting worker");
            }
        }
        self.active.clone()
    }

    /// Waiting worker.
    pub fn waiting(&self) -> Option<Arc<OfflineWorker>> {
        self.waiting.clone()
    }
}
