//! # GymKit Offline Workers
//!
//! Offline cache workers for the two front-end surfaces of the gym CRM: the
//! authenticated client **portal** and the **public** site. Both are one
//! parameterized [`OfflineWorker`] built from a [`WorkerConfig`].
//!
//! ## Features
//!
//! - **Lifecycle**: precache on install, stale-version purge on activate
//! - **Routing**: bypass non-GET, admin and foreign paths; pick a strategy otherwise
//! - **Strategies**: navigation (offline page fallback), cache-first, network-first
//! - **Notifications**: push rendering and click routing
//! - **Background sync**: tag acknowledgement
//!
//! ## Architecture
//!
//! ```text
//! WorkerContainer
//!     ├── OfflineWorker (portal)  ──┐
//!     ├── OfflineWorker (public)  ──┤
//!     │                             ├── Router → Strategy → Fetcher (network)
//!     │                             └── CacheStorage (shared)
//!     ├── Clients
//!     └── Notifications
//!
//! CacheStorage
//!     └── Cache ("<prefix>-cache-v<N>")
//!             └── "GET <url>" → CacheEntry
//! ```

use gymkit_net::NetError;
use thiserror::Error;

pub mod cache;
pub mod clients;
pub mod config;
pub mod container;
pub mod notification;
pub mod router;
pub mod strategy;
pub mod sync;
pub mod worker;

pub use cache::{Cache, CacheEntry, CacheStorage, SharedCacheStorage};
pub use clients::{Client, ClientType, Clients};
pub use config::WorkerConfig;
pub use container::{ServiceWorkerEvent, WorkerContainer};
pub use notification::{
    ClickRoute, Notification, NotificationAction, NotificationConfig, NotificationPayload,
    Notifications, PushMessage,
};
pub use router::{BypassReason, Disposition, Router, Strategy};
pub use sync::SyncOutcome;
pub use worker::{
    ActivateOutcome, EventOutcome, FetchOutcome, InstallOutcome, OfflineWorker, WorkerEvent,
    WorkerId, WorkerState,
};

// ==================== Errors ====================

/// Errors that can occur in offline worker operations.
#[derive(Error, Debug)]
pub enum ServiceWorkerError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(#[from] NetError),

    #[error("Precache of {url} failed: {reason}")]
    InstallFailed { url: String, reason: String },

    #[error("State error: {0}")]
    StateError(String),

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("No response available for {0}")]
    NoResponse(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),
}

/// Milliseconds since the Unix epoch.
pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
