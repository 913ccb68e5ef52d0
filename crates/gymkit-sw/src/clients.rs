//! Clients API: pages a worker may control.

use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use tracing::debug;
use url::Url;

use crate::worker::WorkerId;
use crate::ServiceWorkerError;

/// A client (controlled page).
#[derive(Debug, Clone)]
pub struct Client {
    /// Client ID.
    pub id: String,

    /// Client URL.
    pub url: Url,

    /// Client type.
    pub client_type: ClientType,

    /// Whether focused.
    pub focused: bool,

    /// Worker controlling this client, if any.
    pub controller: Option<WorkerId>,
}

/// Client type. Only window clients are modelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientType {
    #[default]
    Window,
}

impl Client {
    /// A window client at `url`.
    pub fn window(url: Url) -> Self {
        Self {
            id: next_client_id(),
            url,
            client_type: ClientType::Window,
            focused: false,
            controller: None,
        }
    }

    /// Focus the client.
    pub fn focus(&mut self) {
        self.focused = true;
    }
}

/// Clients API.
#[derive(Debug, Default)]
pub struct Clients {
    clients: HashMap<String, Client>,
}

impl Clients {
    /// Create new clients manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a client by ID.
    pub fn get(&self, id: &str) -> Option<&Client> {
        self.clients.get(id)
    }

    /// All clients of a type.
    pub fn match_all(&self, client_type: ClientType) -> Vec<&Client> {
        self.clients
            .values()
            .filter(|c| c.client_type == client_type)
            .collect()
    }

    /// Clients controlled by `worker`.
    pub fn controlled_by(&self, worker: WorkerId) -> Vec<&Client> {
        self.clients
            .values()
            .filter(|c| c.controller == Some(worker))
            .collect()
    }

    /// Open a focused window at `url`.
    pub fn open_window(&mut self, url: Url) -> Client {
        for client in self.clients.values_mut() {
            client.focused = false;
        }

        let mut client = Client::window(url);
        client.focused = true;
        debug!(id = %client.id, url = %client.url, "Opened window");

        self.clients.insert(client.id.clone(), client.clone());
        client
    }

    /// Focus a window already showing `url`, or open one.
    pub fn focus_or_open(&mut self, url: Url) -> Result<Client, ServiceWorkerError> {
        let existing = self
            .clients
            .values()
            .find(|c| c.client_type == ClientType::Window && c.url == url)
            .map(|c| c.id.clone());

        match existing {
            Some(id) => {
                for client in self.clients.values_mut() {
                    client.focused = false;
                }
                let client = self
                    .clients
                    .get_mut(&id)
                    .ok_or_else(|| ServiceWorkerError::NotFound(id.clone()))?;
                client.focus();
                debug!(id = %client.id, url = %client.url, "Focused window");
                Ok(client.clone())
            }
            None => Ok(self.open_window(url)),
        }
    }

    /// Take control of every window client inside `scope`.
    ///
    /// Returns the ids of the claimed clients.
    pub fn claim(&mut self, scope: &Url, worker: WorkerId) -> Vec<String> {
        let mut claimed = Vec::new();
        for client in self.clients.values_mut() {
            if client.client_type == ClientType::Window
                && client.url.as_str().starts_with(scope.as_str())
            {
                client.controller = Some(worker);
                claimed.push(client.id.clone());
            }
        }
        claimed
    }

    /// Add a client.
    pub fn add(&mut self, client: Client) {
        self.clients.insert(client.id.clone(), client);
    }

    /// Remove a client.
    pub fn remove(&mut self, id: &str) -> Option<Client> {
        self.clients.remove(id)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

fn next_client_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    format!("client-{}", COUNTER.fetch_add(1, Ordering::Relaxed))
}
