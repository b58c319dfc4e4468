//! Connected pages and message delivery.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use hashbrown::HashMap;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};
use url::Url;

use crate::lifecycle::ServiceWorkerId;
use crate::messages::WorkerMessage;
use crate::{Result, ServiceWorkerError};

// ==================== Client ====================

/// Client type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientType {
    #[default]
    Window,
    Worker,
    SharedWorker,
    All,
}

/// A client (an open page).
#[derive(Debug, Clone)]
pub struct Client {
    /// Client ID.
    pub id: String,

    /// Client URL.
    pub url: Url,

    /// Client type.
    pub client_type: ClientType,

    /// Worker currently controlling this client.
    pub controller: Option<ServiceWorkerId>,

    sender: mpsc::UnboundedSender<WorkerMessage>,
}

impl Client {
    /// Post message to client.
    pub fn post_message(&self, message: WorkerMessage) -> Result<()> {
        self.sender
            .send(message)
            .map_err(|_| ServiceWorkerError::Delivery(self.id.clone()))
    }
}

/// Options for [`Clients::match_all`].
#[derive(Debug, Clone, Default)]
pub struct ClientMatchOptions {
    pub include_uncontrolled: bool,
    pub client_type: ClientType,
    /// Worker whose controlled clients are wanted.
    pub controller: Option<ServiceWorkerId>,
}

// ==================== Clients ====================

/// Clients API.
#[derive(Debug, Default)]
struct Clients {
    clients: HashMap<String, Client>,
}

impl Clients {
    fn get(&self, id: &str) -> Option<&Client> {
        self.clients.get(id)
    }

    fn match_all(&self, options: &ClientMatchOptions) -> Vec<&Client> {
        self.clients
            .values()
            .filter(|c| options.include_uncontrolled || c.controller == options.controller)
            .filter(|c| match options.client_type {
                ClientType::All => true,
                t => c.client_type == t,
            })
            .collect()
    }

    fn claim(&mut self, worker: ServiceWorkerId) -> usize {
        for client in self.clients.values_mut() {
            client.controller = Some(worker);
        }
        self.clients.len()
    }

    fn add(&mut self, client: Client) {
        self.clients.insert(client.id.clone(), client);
    }

    fn remove(&mut self, id: &str) -> Option<Client> {
        self.clients.remove(id)
    }
}

// ==================== Notifier ====================

/// Result of a broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Pushes messages to open pages. Cheap to clone; clones share clients.
#[derive(Debug, Clone, Default)]
pub struct ClientNotifier {
    clients: Arc<RwLock<Clients>>,
}

impl ClientNotifier {
    /// Create a notifier with no clients.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an open window. Messages for it arrive on the receiver.
    pub async fn connect(&self, url: Url) -> (String, mpsc::UnboundedReceiver<WorkerMessage>) {
        self.connect_as(url, ClientType::Window).await
    }

    /// Register a client of a given type.
    pub async fn connect_as(
        &self,
        url: Url,
        client_type: ClientType,
    ) -> (String, mpsc::UnboundedReceiver<WorkerMessage>) {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        let id = format!("client-{}", COUNTER.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = mpsc::unbounded_channel();

        self.clients.write().await.add(Client {
            id: id.clone(),
            url,
            client_type,
            controller: None,
            sender,
        });
        debug!(client = %id, "Client connected");
        (id, receiver)
    }

    /// Forget a client.
    pub async fn disconnect(&self, id: &str) -> bool {
        self.clients.write().await.remove(id).is_some()
    }

    /// Get a client by ID.
    pub async fn get(&self, id: &str) -> Option<Client> {
        self.clients.read().await.get(id).cloned()
    }

    /// Clients matching the options.
    pub async fn match_all(&self, options: &ClientMatchOptions) -> Vec<Client> {
        self.clients
            .read()
            .await
            .match_all(options)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Take control of every client.
    pub async fn claim(&self, worker: ServiceWorkerId) -> usize {
        self.clients.write().await.claim(worker)
    }

    /// Send to every window, controlled or not. One failing client never
    /// stops delivery to the rest.
    pub async fn broadcast(&self, message: WorkerMessage) -> BroadcastReport {
        let targets = self
            .match_all(&ClientMatchOptions {
                include_uncontrolled: true,
                client_type: ClientType::Window,
                controller: None,
            })
            .await;

        let mut report = BroadcastReport::default();
        for client in targets {
            match client.post_message(message.clone()) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(client = %client.id, error = %e, "Broadcast delivery failed");
                    report.failed += 1;
                }
            }
        }
        debug!(delivered = report.delivered, failed = report.failed, "Broadcast sent");
        report
    }

    /// Reply to one client.
    pub async fn respond(&self, id: &str, message: WorkerMessage) -> Result<()> {
        let clients = self.clients.read().await;
        let client = clients
            .get(id)
            .ok_or_else(|| ServiceWorkerError::NotFound(format!("client {id}")))?;
        client.post_message(message)
    }
}
