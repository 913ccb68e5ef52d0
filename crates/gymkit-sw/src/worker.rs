//! The offline worker: lifecycle state machine plus event handlers.
//!
//! ```text
//! Parsed ──install──▶ Installing ──ok──▶ Installed ──activate──▶ Activating ──▶ Activated
//!                         │
//!                         └──any precache failure──▶ Redundant
//! ```
//!
//! Only an `Activated` worker answers fetches; before that every request
//! passes through to the network untouched.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::try_join_all;
use gymkit_net::{Fetcher, Request, Response};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{CacheEntry, CacheStorage, SharedCacheStorage};
use crate::clients::{Client, Clients};
use crate::config::WorkerConfig;
use crate::container::ServiceWorkerEvent;
use crate::notification::{NotificationPayload, Notifications, PushMessage};
use crate::router::{BypassReason, Disposition, Router, Strategy};
use crate::strategy::{self, StrategyContext};
use crate::sync::SyncOutcome;
use crate::ServiceWorkerError;

// ==================== Types ====================

/// Unique identifier for a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId(u64);

impl WorkerId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for WorkerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sw-{}", self.0)
    }
}

/// Worker lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// Created, not yet installed.
    #[default]
    Parsed,
    /// Precaching.
    Installing,
    /// Precache complete, waiting for activation.
    Installed,
    /// Purging stale caches and claiming clients.
    Activating,
    /// Controlling fetches.
    Activated,
    /// Install failed or replaced.
    Redundant,
}

/// Result of a successful install.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallOutcome {
    pub cache_name: String,
    pub precached: usize,
    /// The worker asked to activate without waiting for old pages to close.
    pub skip_waiting: bool,
}

/// Result of activation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivateOutcome {
    pub deleted: Vec<String>,
    pub claimed: Vec<String>,
}

/// Result of a fetch event.
#[derive(Debug)]
pub enum FetchOutcome {
    /// Not intercepted; the browser goes to the network itself.
    Passthrough(BypassReason),
    /// Answered by a strategy.
    Responded { strategy: Strategy, response: Response },
    /// A strategy ran and had nothing to answer with.
    Failed {
        strategy: Strategy,
        error: ServiceWorkerError,
    },
}

impl FetchOutcome {
    pub fn response(&self) -> Option<&Response> {
        match self {
            FetchOutcome::Responded { response, .. } => Some(response),
            _ => None,
        }
    }

    pub fn into_response(self) -> Option<Response> {
        match self {
            FetchOutcome::Responded { response, .. } => Some(response),
            _ => None,
        }
    }

    pub fn is_passthrough(&self) -> bool {
        matches!(self, FetchOutcome::Passthrough(_))
    }
}

/// Events a host delivers to a worker.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    Install,
    Activate,
    Fetch(Request),
    Push(PushMessage),
    NotificationClick {
        notification_id: u64,
        action: Option<String>,
    },
    Sync(String),
}

/// Result of [`OfflineWorker::dispatch`].
#[derive(Debug)]
pub enum EventOutcome {
    Installed(InstallOutcome),
    Activated(ActivateOutcome),
    Fetched(FetchOutcome),
    Notified(u64),
    Clicked(Option<Client>),
    Synced(SyncOutcome),
}

// ==================== Offline Worker ====================

/// One offline worker instance (portal or public).
pub struct OfflineWorker {
    id: WorkerId,
    config: WorkerConfig,
    cache_name: String,
    origin: Url,
    scope: Url,
    offline_page: Url,
    router: Router,
    state: RwLock<WorkerState>,
    skip_waiting: AtomicBool,
    fetcher: Arc<dyn Fetcher>,
    storage: SharedCacheStorage,
    clients: Arc<RwLock<Clients>>,
    notifications: Arc<RwLock<Notifications>>,
    event_tx: Option<mpsc::UnboundedSender<ServiceWorkerEvent>>,
}

impl fmt::Debug for OfflineWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OfflineWorker")
            .field("id", &self.id)
            .field("label", &self.config.label)
            .field("cache_name", &self.cache_name)
            .field("scope", &self.scope.as_str())
            .finish_non_exhaustive()
    }
}

impl OfflineWorker {
    /// Create a worker for `origin` with its own storage, clients and notifications.
    pub fn new(
        config: WorkerConfig,
        origin: Url,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<Self, ServiceWorkerError> {
        config.validate()?;

        let scope = config.scope_url(&origin)?;
        let offline_page = config.offline_page(&origin)?;

        Ok(Self {
            id: WorkerId::new(),
            cache_name: config.cache_name(),
            router: Router::new(&config),
            config,
            origin,
            scope,
            offline_page,
            state: RwLock::new(WorkerState::Parsed),
            skip_waiting: AtomicBool::new(false),
            fetcher,
            storage: CacheStorage::shared(),
            clients: Arc::new(RwLock::new(Clients::new())),
            notifications: Arc::new(RwLock::new(Notifications::new())),
            event_tx: None,
        })
    }

    /// Share cache storage with other workers of the origin.
    pub fn with_storage(mut self, storage: SharedCacheStorage) -> Self {
        self.storage = storage;
        self
    }

    /// Share the clients registry.
    pub fn with_clients(mut self, clients: Arc<RwLock<Clients>>) -> Self {
        self.clients = clients;
        self
    }

    /// Share the notifications registry.
    pub fn with_notifications(mut self, notifications: Arc<RwLock<Notifications>>) -> Self {
        self.notifications = notifications;
        self
    }

    /// Report lifecycle events on `tx`.
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<ServiceWorkerEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    pub fn scope(&self) -> &Url {
        &self.scope
    }

    pub fn storage(&self) -> &SharedCacheStorage {
        &self.storage
    }

    pub fn clients(&self) -> &Arc<RwLock<Clients>> {
        &self.clients
    }

    pub fn notifications(&self) -> &Arc<RwLock<Notifications>> {
        &self.notifications
    }

    pub async fn state(&self) -> WorkerState {
        *self.state.read().await
    }

    /// Whether install asked to skip the waiting phase.
    pub fn skips_waiting(&self) -> bool {
        self.skip_waiting.load(Ordering::SeqCst)
    }

    // ==================== Lifecycle ====================

    /// Precache the manifest into the current cache.
    ///
    /// All or nothing: if any entry fails to fetch or is not `ok`, nothing is
    /// stored and the worker becomes redundant.
    pub async fn install(&self) -> Result<InstallOutcome, ServiceWorkerError> {
        self.transition(WorkerState::Parsed, WorkerState::Installing)
            .await?;
        info!(label = %self.config.label, cache = %self.cache_name, "Installing worker");

        match self.precache().await {
            Ok(precached) => {
                self.skip_waiting.store(true, Ordering::SeqCst);
                self.set_state(WorkerState::Installed).await;
                info!(label = %self.config.label, precached, "Precached assets");
                Ok(InstallOutcome {
                    cache_name: self.cache_name.clone(),
                    precached,
                    skip_waiting: true,
                })
            }
            Err(error) => {
                warn!(label = %self.config.label, %error, "Install failed");
                self.set_state(WorkerState::Redundant).await;
                Err(error)
            }
        }
    }

    async fn precache(&self) -> Result<usize, ServiceWorkerError> {
        self.storage.write().await.open(&self.cache_name);

        let requests: Vec<Request> = self
            .config
            .resolve_precache(&self.origin)?
            .into_iter()
            .map(Request::get)
            .collect();

        let entries = try_join_all(requests.iter().map(|r| self.precache_one(r))).await?;

        let mut storage = self.storage.write().await;
        let cache = storage.open(&self.cache_name);
        for entry in entries {
            cache.put(entry);
        }
        Ok(requests.len())
    }

    async fn precache_one(&self, request: &Request) -> Result<CacheEntry, ServiceWorkerError> {
        let response = self.fetcher.fetch(request).await.map_err(|e| {
            ServiceWorkerError::InstallFailed {
                url: request.url.to_string(),
                reason: e.to_string(),
            }
        })?;

        if !response.ok() {
            return Err(ServiceWorkerError::InstallFailed {
                url: request.url.to_string(),
                reason: format!("status {}", response.status),
            });
        }

        debug!(url = %request.url, "Precached");
        Ok(CacheEntry::from_response(request, &response))
    }

    /// Purge stale caches of this family, then claim clients in scope.
    pub async fn activate(&self) -> Result<ActivateOutcome, ServiceWorkerError> {
        self.transition(WorkerState::Installed, WorkerState::Activating)
            .await?;
        info!(label = %self.config.label, "Activating worker");

        let names = self.storage.read().await.keys();
        let mut deleted = Vec::new();
        for name in names.into_iter().filter(|n| self.config.is_stale_cache(n)) {
            // Another tab may have purged it already; keep going either way.
            if self.storage.write().await.delete(&name) {
                info!(label = %self.config.label, cache = %name, "Deleted old cache");
                self.emit(ServiceWorkerEvent::CacheDeleted { name: name.clone() });
                deleted.push(name);
            } else {
                warn!(label = %self.config.label, cache = %name, "Old cache already gone");
            }
        }

        let claimed = self.clients.write().await.claim(&self.scope, self.id);
        for client_id in &claimed {
            self.emit(ServiceWorkerEvent::ControllerChange {
                client_id: client_id.clone(),
                worker_id: self.id,
            });
        }

        self.set_state(WorkerState::Activated).await;
        Ok(ActivateOutcome { deleted, claimed })
    }

    /// Mark the worker as replaced.
    pub async fn retire(&self) {
        self.set_state(WorkerState::Redundant).await;
    }

    // ==================== Events ====================

    /// Handle an intercepted request.
    pub async fn handle_fetch(&self, request: &Request) -> FetchOutcome {
        if self.state().await != WorkerState::Activated {
            return FetchOutcome::Passthrough(BypassReason::NotControlling);
        }

        let strategy = match self.router.route(request) {
            Disposition::Bypass(reason) => return FetchOutcome::Passthrough(reason),
            Disposition::Dispatch(strategy) => strategy,
        };

        let ctx = StrategyContext {
            label: &self.config.label,
            cache_name: &self.cache_name,
            offline_page: &self.offline_page,
            storage: &self.storage,
            fetcher: self.fetcher.as_ref(),
        };

        match strategy::respond(&ctx, strategy, request).await {
            Ok(response) => FetchOutcome::Responded { strategy, response },
            Err(error) => {
                debug!(url = %request.url, ?strategy, %error, "No response");
                FetchOutcome::Failed { strategy, error }
            }
        }
    }

    /// Show a notification for a push message; returns its id.
    pub async fn on_push(&self, message: &PushMessage) -> u64 {
        let payload =
            NotificationPayload::build(&self.config.notification, message, crate::now_millis());
        let id = self
            .notifications
            .write()
            .await
            .show(&self.config.notification.title, payload);

        debug!(label = %self.config.label, id, "Notification shown");
        self.emit(ServiceWorkerEvent::NotificationShown { id });
        id
    }

    /// Close the notification and follow the configured click route.
    pub async fn on_notification_click(
        &self,
        notification_id: u64,
        action: Option<&str>,
    ) -> Result<Option<Client>, ServiceWorkerError> {
        if !self.notifications.write().await.close(notification_id) {
            debug!(notification_id, "Notification already closed");
        }

        let route = match &self.config.notification.click {
            Some(route) if action == Some(route.action.as_str()) => route,
            _ => return Ok(None),
        };

        let url = self.config.resolve(&self.origin, &route.url)?;
        let client = self.clients.write().await.focus_or_open(url)?;
        info!(label = %self.config.label, url = %client.url, "Opened client from notification");
        Ok(Some(client))
    }

    /// Handle a background-sync event.
    pub fn on_sync(&self, tag: &str) -> SyncOutcome {
        let outcome = SyncOutcome::for_tag(&self.config.sync_tags, tag);
        match outcome {
            SyncOutcome::Acknowledged => info!(label = %self.config.label, tag, "Syncing"),
            SyncOutcome::Ignored => debug!(label = %self.config.label, tag, "Unknown sync tag"),
        }
        outcome
    }

    /// Route an event to its handler.
    pub async fn dispatch(&self, event: WorkerEvent) -> Result<EventOutcome, ServiceWorkerError> {
        match event {
            WorkerEvent::Install => self.install().await.map(EventOutcome::Installed),
            WorkerEvent::Activate => self.activate().await.map(EventOutcome::Activated),
            WorkerEvent::Fetch(request) => {
                Ok(EventOutcome::Fetched(self.handle_fetch(&request).await))
            }
            WorkerEvent::Push(message) => Ok(EventOutcome::Notified(self.on_push(&message).await)),
            WorkerEvent::NotificationClick {
                notification_id,
                action,
            } => self
                .on_notification_click(notification_id, action.as_deref())
                .await
                .map(EventOutcome::Clicked),
            WorkerEvent::Sync(tag) => Ok(EventOutcome::Synced(self.on_sync(&tag))),
        }
    }

    // ==================== Helpers ====================

    async fn transition(
        &self,
        from: WorkerState,
        to: WorkerState,
    ) -> Result<(), ServiceWorkerError> {
        {
            let mut state = self.state.write().await;
            if *state != from {
                return Err(ServiceWorkerError::StateError(format!(
                    "cannot move {} worker from {:?} to {:?}",
                    self.config.label, *state, to
                )));
            }
            *state = to;
        }
        self.emit_state(to);
        Ok(())
    }

    async fn set_state(&self, state: WorkerState) {
        *self.state.write().await = state;
        self.emit_state(state);
    }

    fn emit_state(&self, new_state: WorkerState) {
        self.emit(ServiceWorkerEvent::StateChange {
            scope: self.scope.to_string(),
            worker_id: self.id,
            new_state,
        });
    }

    fn emit(&self, event: ServiceWorkerEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gymkit_net::StubFetcher;
    use std::time::Duration;

    fn origin() -> Url {
        Url::parse("https://gym.test/").unwrap()
    }

    fn stub_for(config: &WorkerConfig) -> Arc<StubFetcher> {
        let stub = Arc::new(StubFetcher::new());
        for url in config.resolve_precache(&origin()).unwrap() {
            stub.respond(url.as_str(), 200, format!("precached {}", url.path()));
        }
        stub
    }

    #[tokio::test]
    async fn test_install_then_activate() {
        let config = WorkerConfig::public();
        let stub = stub_for(&config);
        let worker = OfflineWorker::new(config, origin(), stub.clone()).unwrap();

        assert_eq!(worker.state().await, WorkerState::Parsed);

        let installed = worker.install().await.unwrap();
        assert_eq!(installed.precached, 4);
        assert!(installed.skip_waiting);
        assert!(worker.skips_waiting());
        assert_eq!(worker.state().await, WorkerState::Installed);

        worker.activate().await.unwrap();
        assert_eq!(worker.state().await, WorkerState::Activated);

        let storage = worker.storage().read().await;
        assert_eq!(storage.get("public-portal-cache-v1").unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_non_ok_precache_aborts_install() {
        let config = WorkerConfig::public();
        let stub = stub_for(&config);
        stub.respond("https://gym.test/static/manifest_public.json", 404, "");
        let worker = OfflineWorker::new(config, origin(), stub).unwrap();

        let err = worker.install().await.unwrap_err();
        assert!(matches!(err, ServiceWorkerError::InstallFailed { .. }));
        assert_eq!(worker.state().await, WorkerState::Redundant);
        assert!(worker
            .storage()
            .read()
            .await
            .get("public-portal-cache-v1")
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_lifecycle_order_is_enforced() {
        let config = WorkerConfig::public();
        let stub = stub_for(&config);
        let worker = OfflineWorker::new(config, origin(), stub).unwrap();

        assert!(matches!(
            worker.activate().await,
            Err(ServiceWorkerError::StateError(_))
        ));

        worker.install().await.unwrap();
        assert!(matches!(
            worker.install().await,
            Err(ServiceWorkerError::StateError(_))
        ));
    }

    #[tokio::test]
    async fn test_activation_tolerates_a_cache_deleted_elsewhere() {
        let config = WorkerConfig::portal().with_version(2);
        let stub = stub_for(&config);
        let worker = Arc::new(OfflineWorker::new(config, origin(), stub).unwrap());
        worker.storage().write().await.open("portal-cache-v1");
        worker.install().await.unwrap();
        worker
            .clients()
            .write()
            .await
            .add(Client::window(origin().join("/portal/bookings/").unwrap()));

        // Activation queues behind this guard; another tab's delete queues
        // behind activation's read and wins the race for the stale cache.
        let guard = worker.storage().write().await;
        let activating = tokio::spawn({
            let worker = worker.clone();
            async move { worker.activate().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let storage = worker.storage().clone();
        let other_tab =
            tokio::spawn(async move { storage.write().await.delete("portal-cache-v1") });
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(guard);

        let activated = activating.await.unwrap().unwrap();
        assert!(other_tab.await.unwrap());
        assert!(activated.deleted.is_empty());
        assert_eq!(activated.claimed.len(), 1);
        assert_eq!(worker.state().await, WorkerState::Activated);
        assert!(!worker.storage().read().await.has("portal-cache-v1"));
    }

    #[tokio::test]
    async fn test_fetch_before_activation_passes_through() {
        let config = WorkerConfig::portal();
        let stub = stub_for(&config);
        let worker = OfflineWorker::new(config, origin(), stub.clone()).unwrap();
        worker.install().await.unwrap();
        let calls_after_install = stub.total_calls();

        let request = Request::navigate(origin().join("/portal/").unwrap());
        let outcome = worker.handle_fetch(&request).await;
        assert!(matches!(
            outcome,
            FetchOutcome::Passthrough(BypassReason::NotControlling)
        ));
        assert_eq!(stub.total_calls(), calls_after_install);
    }

    #[tokio::test]
    async fn test_state_changes_are_reported() {
        let config = WorkerConfig::public();
        let stub = stub_for(&config);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let worker = OfflineWorker::new(config, origin(), stub)
            .unwrap()
            .with_events(tx);

        worker.install().await.unwrap();

        let mut states = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let ServiceWorkerEvent::StateChange { new_state, .. } = event {
                states.push(new_state);
            }
        }
        assert_eq!(states, vec![WorkerState::Installing, WorkerState::Installed]);
    }

    #[tokio::test]
    async fn test_sync_tags() {
        let portal = OfflineWorker::new(
            WorkerConfig::portal(),
            origin(),
            Arc::new(StubFetcher::new()),
        )
        .unwrap();
        assert_eq!(portal.on_sync("sync-bookings"), SyncOutcome::Acknowledged);

        let public = OfflineWorker::new(
            WorkerConfig::public(),
            origin(),
            Arc::new(StubFetcher::new()),
        )
        .unwrap();
        let outcome = public
            .dispatch(WorkerEvent::Sync("sync-bookings".to_string()))
            .await
            .unwrap();
        assert!(matches!(outcome, EventOutcome::Synced(SyncOutcome::Ignored)));
    }
}
