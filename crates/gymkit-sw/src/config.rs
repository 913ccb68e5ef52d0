//! Per-portal worker configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::notification::{ClickRoute, NotificationAction, NotificationConfig};
use crate::ServiceWorkerError;

/// Immutable configuration of one offline worker instance.
///
/// The portal and the public site differ only in these values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Label used in log lines.
    pub label: String,

    /// Cache family; cache names are `<cache_prefix>-cache-v<version>`.
    pub cache_prefix: String,

    /// Cache version. Bumping it invalidates every older cache of the family.
    pub version: u32,

    /// Path the worker controls.
    pub scope: String,

    /// Application routes handled by this worker.
    pub routed_prefix: String,

    /// Static asset routes (always handled, cache-first).
    pub static_prefix: String,

    /// Administrative routes (never handled).
    pub admin_prefix: String,

    /// Host substring marking CDN assets.
    pub cdn_marker: String,

    /// Offline fallback page; must be part of `precache`.
    pub offline_url: String,

    /// Manifest fetched at install time, all or nothing.
    pub precache: Vec<String>,

    /// Push notification rendering.
    pub notification: NotificationConfig,

    /// Background-sync tags this worker acknowledges.
    pub sync_tags: Vec<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::portal()
    }
}

const TAILWIND_CDN: &str = "https://cdn.tailwindcss.com";
const ALPINE_CDN: &str = "https://cdn.jsdelivr.net/npm/alpinejs@3.x.x/dist/cdn.min.js";

impl WorkerConfig {
    /// The authenticated client portal.
    pub fn portal() -> Self {
        Self {
            label: "Portal".to_string(),
            cache_prefix: "portal".to_string(),
            version: 1,
            scope: "/portal/".to_string(),
            routed_prefix: "/portal/".to_string(),
            static_prefix: "/static/".to_string(),
            admin_prefix: "/admin/".to_string(),
            cdn_marker: "cdn.".to_string(),
            offline_url: "/offline/".to_string(),
            precache: vec![
                "/portal/".to_string(),
                "/portal/bookings/".to_string(),
                "/portal/profile/".to_string(),
                "/static/manifest_portal.json".to_string(),
                "/offline/".to_string(),
                TAILWIND_CDN.to_string(),
                ALPINE_CDN.to_string(),
            ],
            notification: NotificationConfig {
                title: "Mi Gym".to_string(),
                default_body: "Nueva notificación del gimnasio".to_string(),
                actions: vec![
                    NotificationAction {
                        action: "view".to_string(),
                        title: "Ver".to_string(),
                        icon: Some("/static/icons/icon-96x96.png".to_string()),
                    },
                    NotificationAction {
                        action: "close".to_string(),
                        title: "Cerrar".to_string(),
                        icon: None,
                    },
                ],
                click: Some(ClickRoute {
                    action: "view".to_string(),
                    url: "/portal/".to_string(),
                }),
                ..NotificationConfig::default()
            },
            sync_tags: vec!["sync-bookings".to_string()],
        }
    }

    /// The public-facing site.
    pub fn public() -> Self {
        Self {
            label: "Public".to_string(),
            cache_prefix: "public-portal".to_string(),
            scope: "/public/".to_string(),
            routed_prefix: "/public/".to_string(),
            precache: vec![
                "/public/".to_string(),
                "/static/manifest_public.json".to_string(),
                "/offline/".to_string(),
                TAILWIND_CDN.to_string(),
            ],
            notification: NotificationConfig {
                title: "Gimnasio".to_string(),
                default_body: "Nueva actualización disponible".to_string(),
                ..NotificationConfig::default()
            },
            sync_tags: Vec::new(),
            ..Self::portal()
        }
    }

    /// Look up a built-in configuration by name.
    pub fn named(name: &str) -> Option<Self> {
        match name {
            "portal" => Some(Self::portal()),
            "public" => Some(Self::public()),
            _ => None,
        }
    }

    /// Return a copy with a different cache version.
    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Name of the current cache.
    pub fn cache_name(&self) -> String {
        format!("{}-cache-v{}", self.cache_prefix, self.version)
    }

    /// Prefix shared by every cache of this worker's family.
    pub fn stale_prefix(&self) -> String {
        format!("{}-cache-", self.cache_prefix)
    }

    /// Whether `name` belongs to this family but not to the current version.
    pub fn is_stale_cache(&self, name: &str) -> bool {
        name.starts_with(&self.stale_prefix()) && name != self.cache_name()
    }

    /// Resolve a relative or absolute manifest entry against `origin`.
    pub fn resolve(&self, origin: &Url, entry: &str) -> Result<Url, ServiceWorkerError> {
        Ok(origin.join(entry)?)
    }

    /// The precache manifest as absolute URLs, in manifest order.
    pub fn resolve_precache(&self, origin: &Url) -> Result<Vec<Url>, ServiceWorkerError> {
        self.precache
            .iter()
            .map(|entry| self.resolve(origin, entry))
            .collect()
    }

    /// Absolute URL of the offline fallback page.
    pub fn offline_page(&self, origin: &Url) -> Result<Url, ServiceWorkerError> {
        self.resolve(origin, &self.offline_url)
    }

    /// Absolute URL of the controlled scope.
    pub fn scope_url(&self, origin: &Url) -> Result<Url, ServiceWorkerError> {
        self.resolve(origin, &self.scope)
    }

    /// Check internal consistency.
    pub fn validate(&self) -> Result<(), ServiceWorkerError> {
        if self.version == 0 {
            return Err(ServiceWorkerError::Config(
                "version must be at least 1".to_string(),
            ));
        }
        if self.cache_prefix.is_empty() {
            return Err(ServiceWorkerError::Config(
                "cache_prefix must not be empty".to_string(),
            ));
        }
        for (field, value) in [
            ("scope", &self.scope),
            ("routed_prefix", &self.routed_prefix),
            ("static_prefix", &self.static_prefix),
            ("admin_prefix", &self.admin_prefix),
        ] {
            if !value.starts_with('/') || !value.ends_with('/') {
                return Err(ServiceWorkerError::Config(format!(
                    "{field} must start and end with '/': {value:?}"
                )));
            }
        }
        if !self.precache.iter().any(|entry| entry == &self.offline_url) {
            return Err(ServiceWorkerError::Config(format!(
                "offline page {} is not in the precache manifest",
                self.offline_url
            )));
        }
        Ok(())
    }

    /// Parse and validate a JSON configuration.
    pub fn from_json_str(json: &str) -> Result<Self, ServiceWorkerError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ServiceWorkerError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_names() {
        let portal = WorkerConfig::portal();
        assert_eq!(portal.cache_name(), "portal-cache-v1");
        assert_eq!(portal.stale_prefix(), "portal-cache-");

        let public = WorkerConfig::public();
        assert_eq!(public.cache_name(), "public-portal-cache-v1");
        assert_eq!(public.stale_prefix(), "public-portal-cache-");
    }

    #[test]
    fn test_stale_detection_ignores_other_families() {
        let portal = WorkerConfig::portal().with_version(2);
        assert!(portal.is_stale_cache("portal-cache-v1"));
        assert!(!portal.is_stale_cache("portal-cache-v2"));
        assert!(!portal.is_stale_cache("public-portal-cache-v1"));
        assert!(!portal.is_stale_cache("fonts"));
    }

    #[test]
    fn test_resolve_precache() {
        let origin = Url::parse("https://gym.test/").unwrap();
        let urls = WorkerConfig::public().resolve_precache(&origin).unwrap();
        let urls: Vec<&str> = urls.iter().map(|u| u.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://gym.test/public/",
                "https://gym.test/static/manifest_public.json",
                "https://gym.test/offline/",
                "https://cdn.tailwindcss.com/",
            ]
        );
    }

    #[test]
    fn test_builtin_configs_validate() {
        WorkerConfig::portal().validate().unwrap();
        WorkerConfig::public().validate().unwrap();
        assert!(WorkerConfig::named("admin").is_none());
    }

    #[test]
    fn test_validate_rejects_missing_offline_page() {
        let mut config = WorkerConfig::public();
        config.precache.retain(|entry| entry != "/offline/");
        assert!(matches!(
            config.validate(),
            Err(ServiceWorkerError::Config(_))
        ));
    }

    #[test]
    fn test_validate_rejects_bad_prefix() {
        let mut config = WorkerConfig::portal();
        config.routed_prefix = "/portal".to_string();
        assert!(config.validate().is_err());

        assert!(WorkerConfig::portal().with_version(0).validate().is_err());
    }

    #[test]
    fn test_partial_json_overrides_defaults() {
        let config = WorkerConfig::from_json_str(r#"{ "version": 3 }"#).unwrap();
        assert_eq!(config.cache_name(), "portal-cache-v3");
        assert_eq!(config.notification.title, "Mi Gym");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("public.json");
        let json = serde_json::to_string_pretty(&WorkerConfig::public().with_version(5)).unwrap();
        std::fs::write(&path, json).unwrap();

        let config = WorkerConfig::load(&path).unwrap();
        assert_eq!(config.cache_name(), "public-portal-cache-v5");
        assert!(config.notification.click.is_none());
    }
}
