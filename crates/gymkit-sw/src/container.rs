//! Worker container: the host side of worker registration.
//!
//! Holds one registration per scope over a shared cache storage, client
//! list and notification registry, and routes host events to the right
//! worker.

use std::sync::Arc;

use gymkit_net::{Fetcher, Request};
use hashbrown::HashMap;
use tokio::sync::{mpsc, RwLock};
use tracing::{info, warn};
use url::Url;

use crate::cache::{CacheStorage, SharedCacheStorage};
use crate::clients::{Client, Clients};
use crate::config::WorkerConfig;
use crate::notification::{Notifications, PushMessage};
use crate::router::BypassReason;
use crate::worker::{FetchOutcome, OfflineWorker, WorkerId, WorkerState};
use crate::ServiceWorkerError;

/// Events reported by workers and the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceWorkerEvent {
    /// State changed.
    StateChange {
        scope: String,
        worker_id: WorkerId,
        new_state: WorkerState,
    },
    /// A new worker finished installing for a scope.
    UpdateFound { scope: String },
    /// A stale cache was deleted during activation.
    CacheDeleted { name: String },
    /// Controller changed.
    ControllerChange {
        client_id: String,
        worker_id: WorkerId,
    },
    /// A notification was displayed.
    NotificationShown { id: u64 },
}

/// Registrations for one origin.
pub struct WorkerContainer {
    origin: Url,

    /// Active workers by scope URL.
    registrations: Arc<RwLock<HashMap<String, Arc<OfflineWorker>>>>,

    /// Cache storage.
    pub caches: SharedCacheStorage,

    /// Clients.
    pub clients: Arc<RwLock<Clients>>,

    /// Shown notifications.
    pub notifications: Arc<RwLock<Notifications>>,

    fetcher: Arc<dyn Fetcher>,

    /// Event sender for state changes.
    event_tx: mpsc::UnboundedSender<ServiceWorkerEvent>,
}

impl WorkerContainer {
    /// Create a new container.
    pub fn new(
        origin: Url,
        fetcher: Arc<dyn Fetcher>,
    ) -> (Self, mpsc::UnboundedReceiver<ServiceWorkerEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        (
            Self {
                origin,
                registrations: Arc::new(RwLock::new(HashMap::new())),
                caches: CacheStorage::shared(),
                clients: Arc::new(RwLock::new(Clients::new())),
                notifications: Arc::new(RwLock::new(Notifications::new())),
                fetcher,
                event_tx,
            },
            event_rx,
        )
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    /// Install a worker for `config` and, since it skips waiting, activate it.
    ///
    /// A failed install leaves any existing registration for the scope in charge.
    pub async fn register(
        &self,
        config: WorkerConfig,
    ) -> Result<Arc<OfflineWorker>, ServiceWorkerError> {
        let worker = OfflineWorker::new(config, self.origin.clone(), self.fetcher.clone())?
            .with_storage(self.caches.clone())
            .with_clients(self.clients.clone())
            .with_notifications(self.notifications.clone())
            .with_events(self.event_tx.clone());
        let worker = Arc::new(worker);
        let scope = worker.scope().to_string();

        let installed = worker.install().await?;
        let _ = self.event_tx.send(ServiceWorkerEvent::UpdateFound {
            scope: scope.clone(),
        });

        if !installed.skip_waiting {
            return Ok(worker);
        }

        // The previous worker keeps the scope until its replacement is active.
        worker.activate().await?;
        let previous = self
            .registrations
            .write()
            .await
            .insert(scope.clone(), worker.clone());
        if let Some(previous) = previous {
            previous.retire().await;
        }

        info!(%scope, cache = %worker.cache_name(), "Worker registered");
        Ok(worker)
    }

    /// The worker whose scope is the longest prefix of `url`.
    pub async fn get_registration(&self, url: &Url) -> Option<Arc<OfflineWorker>> {
        let registrations = self.registrations.read().await;
        registrations
            .iter()
            .filter(|(scope, _)| url.as_str().starts_with(scope.as_str()))
            .max_by_key(|(scope, _)| scope.len())
            .map(|(_, worker)| worker.clone())
    }

    /// All registered scopes.
    pub async fn get_registrations(&self) -> Vec<String> {
        let mut scopes: Vec<String> = self.registrations.read().await.keys().cloned().collect();
        scopes.sort();
        scopes
    }

    /// Handle a fetch from a page.
    ///
    /// Navigations are controlled by the worker whose scope covers the target;
    /// sub-resources by the worker controlling the requesting page.
    pub async fn handle_fetch(&self, request: &Request, client_url: Option<&Url>) -> FetchOutcome {
        let controlling_url = if request.is_navigation() {
            &request.url
        } else {
            client_url.unwrap_or(&request.url)
        };

        match self.get_registration(controlling_url).await {
            Some(worker) => worker.handle_fetch(request).await,
            None => FetchOutcome::Passthrough(BypassReason::OutOfScope),
        }
    }

    /// Deliver a push message to the worker registered for `scope`.
    pub async fn push(&self, scope: &Url, message: &PushMessage) -> Result<u64, ServiceWorkerError> {
        let worker = self.registered(scope).await?;
        Ok(worker.on_push(message).await)
    }

    /// Deliver a notification click to the worker registered for `scope`.
    pub async fn notification_click(
        &self,
        scope: &Url,
        notification_id: u64,
        action: Option<&str>,
    ) -> Result<Option<Client>, ServiceWorkerError> {
        let worker = self.registered(scope).await?;
        worker.on_notification_click(notification_id, action).await
    }

    /// Unregister a worker.
    pub async fn unregister(&self, scope: &Url) -> bool {
        let removed = self.registrations.write().await.remove(scope.as_str());
        match removed {
            Some(worker) => {
                worker.retire().await;
                true
            }
            None => {
                warn!(%scope, "No registration to remove");
                false
            }
        }
    }

    async fn registered(&self, scope: &Url) -> Result<Arc<OfflineWorker>, ServiceWorkerError> {
        self.registrations
            .read()
            .await
            .get(scope.as_str())
            .cloned()
            .ok_or_else(|| ServiceWorkerError::NotFound(scope.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gymkit_net::StubFetcher;

    fn origin() -> Url {
        Url::parse("https://gym.test/").unwrap()
    }

    fn stub() -> Arc<StubFetcher> {
        let stub = Arc::new(StubFetcher::new());
        for config in [WorkerConfig::portal(), WorkerConfig::public()] {
            for url in config.resolve_precache(&origin()).unwrap() {
                stub.respond(url.as_str(), 200, url.path().to_string());
            }
        }
        stub
    }

    #[tokio::test]
    async fn test_container_register() {
        let (container, _rx) = WorkerContainer::new(origin(), stub());

        container.register(WorkerConfig::portal()).await.unwrap();
        container.register(WorkerConfig::public()).await.unwrap();

        assert_eq!(
            container.get_registrations().await,
            vec![
                "https://gym.test/portal/".to_string(),
                "https://gym.test/public/".to_string()
            ]
        );
        assert_eq!(
            container.caches.read().await.keys(),
            vec!["portal-cache-v1".to_string(), "public-portal-cache-v1".to_string()]
        );
    }

    #[tokio::test]
    async fn test_failed_install_keeps_previous_worker() {
        let fetcher = stub();
        let (container, _rx) = WorkerContainer::new(origin(), fetcher.clone());
        let v1 = container.register(WorkerConfig::portal()).await.unwrap();

        fetcher.fail("https://cdn.tailwindcss.com/");
        let result = container
            .register(WorkerConfig::portal().with_version(2))
            .await;
        assert!(result.is_err());

        let scope = Url::parse("https://gym.test/portal/").unwrap();
        let active = container.get_registration(&scope).await.unwrap();
        assert_eq!(active.id(), v1.id());
        assert_eq!(active.state().await, WorkerState::Activated);
    }

    #[tokio::test]
    async fn test_replacement_activates_before_previous_retires() {
        let (container, mut rx) = WorkerContainer::new(origin(), stub());
        let v1 = container.register(WorkerConfig::portal()).await.unwrap();
        while rx.try_recv().is_ok() {}

        let v2 = container
            .register(WorkerConfig::portal().with_version(2))
            .await
            .unwrap();

        let mut changes = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let ServiceWorkerEvent::StateChange {
                worker_id,
                new_state,
                ..
            } = event
            {
                changes.push((worker_id, new_state));
            }
        }
        let activated = changes
            .iter()
            .position(|c| *c == (v2.id(), WorkerState::Activated))
            .unwrap();
        let retired = changes
            .iter()
            .position(|c| *c == (v1.id(), WorkerState::Redundant))
            .unwrap();
        assert!(activated < retired, "{changes:?}");

        let scope = Url::parse("https://gym.test/portal/").unwrap();
        assert_eq!(container.get_registration(&scope).await.unwrap().id(), v2.id());
    }

    #[tokio::test]
    async fn test_subresources_follow_the_client_page() {
        let (container, _rx) = WorkerContainer::new(origin(), stub());
        container.register(WorkerConfig::portal()).await.unwrap();

        let asset = Request::get(origin().join("/static/manifest_portal.json").unwrap());
        let portal_page = origin().join("/portal/bookings/").unwrap();
        let outcome = container.handle_fetch(&asset, Some(&portal_page)).await;
        assert!(outcome.response().unwrap().is_from_cache());

        let other_page = origin().join("/").unwrap();
        let outcome = container.handle_fetch(&asset, Some(&other_page)).await;
        assert!(matches!(
            outcome,
            FetchOutcome::Passthrough(BypassReason::OutOfScope)
        ));
    }

    #[tokio::test]
    async fn test_push_requires_registration() {
        let (container, _rx) = WorkerContainer::new(origin(), stub());
        let scope = Url::parse("https://gym.test/public/").unwrap();

        let err = container
            .push(&scope, &PushMessage::empty())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceWorkerError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_container_unregister() {
        let (container, _rx) = WorkerContainer::new(origin(), stub());
        let worker = container.register(WorkerConfig::public()).await.unwrap();

        let scope = Url::parse("https://gym.test/public/").unwrap();
        assert!(container.unregister(&scope).await);
        assert!(!container.unregister(&scope).await);
        assert_eq!(worker.state().await, WorkerState::Redundant);
        assert!(container.get_registrations().await.is_empty());
    }
}
