//! Request classification.
//!
//! Rules are evaluated in order and the first match wins:
//!
//! 1. non-GET → bypass
//! 2. admin path → bypass
//! 3. neither routed nor static path → bypass
//! 4. navigation → [`Strategy::Navigation`]; static path or CDN host →
//!    [`Strategy::CacheFirst`]; anything else → [`Strategy::NetworkFirst`]

use gymkit_net::Request;
use http::Method;
use serde::Serialize;
use tracing::trace;

use crate::config::WorkerConfig;

/// Why a request is left to the browser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BypassReason {
    /// State-changing method.
    NonGet,
    /// Administrative route.
    Admin,
    /// Not under this worker's routes.
    OutOfScope,
    /// The worker is not the active controller.
    NotControlling,
}

/// Caching strategy for an intercepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Network first, then exact cache match, then the offline page.
    Navigation,
    /// Cache first, then network.
    CacheFirst,
    /// Network first, then exact cache match.
    NetworkFirst,
}

/// Routing decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "disposition", content = "detail", rename_all = "snake_case")]
pub enum Disposition {
    Bypass(BypassReason),
    Dispatch(Strategy),
}

impl Disposition {
    pub fn strategy(&self) -> Option<Strategy> {
        match self {
            Disposition::Dispatch(strategy) => Some(*strategy),
            Disposition::Bypass(_) => None,
        }
    }
}

/// Per-worker request router.
#[derive(Debug, Clone)]
pub struct Router {
    routed_prefix: String,
    static_prefix: String,
    admin_prefix: String,
    cdn_marker: String,
}

impl Router {
    pub fn new(config: &WorkerConfig) -> Self {
        Self {
            routed_prefix: config.routed_prefix.clone(),
            static_prefix: config.static_prefix.clone(),
            admin_prefix: config.admin_prefix.clone(),
            cdn_marker: config.cdn_marker.clone(),
        }
    }

    /// Classify a request.
    pub fn route(&self, request: &Request) -> Disposition {
        let disposition = self.classify(request);
        trace!(
            url = %request.url,
            method = %request.method,
            disposition = ?disposition,
            "Routed request"
        );
        disposition
    }

    fn classify(&self, request: &Request) -> Disposition {
        if request.method != Method::GET {
            return Disposition::Bypass(BypassReason::NonGet);
        }

        let path = request.url.path();
        if path.starts_with(&self.admin_prefix) {
            return Disposition::Bypass(BypassReason::Admin);
        }

        let is_static = path.starts_with(&self.static_prefix);
        if !path.starts_with(&self.routed_prefix) && !is_static {
            return Disposition::Bypass(BypassReason::OutOfScope);
        }

        if request.is_navigation() {
            return Disposition::Dispatch(Strategy::Navigation);
        }

        let is_cdn = request
            .url
            .host_str()
            .is_some_and(|host| host.contains(&self.cdn_marker));
        if is_static || is_cdn {
            Disposition::Dispatch(Strategy::CacheFirst)
        } else {
            Disposition::Dispatch(Strategy::NetworkFirst)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn portal() -> Router {
        Router::new(&WorkerConfig::portal())
    }

    fn get(url: &str) -> Request {
        Request::get(Url::parse(url).unwrap())
    }

    fn nav(url: &str) -> Request {
        Request::navigate(Url::parse(url).unwrap())
    }

    #[test]
    fn test_non_get_is_bypassed_first() {
        let router = portal();
        for method in [Method::POST, Method::PUT, Method::DELETE, Method::PATCH, Method::HEAD] {
            let request = nav("https://gym.test/portal/bookings/").with_method(method);
            assert_eq!(
                router.route(&request),
                Disposition::Bypass(BypassReason::NonGet)
            );
        }
    }

    #[test]
    fn test_admin_is_bypassed() {
        let router = portal();
        assert_eq!(
            router.route(&nav("https://gym.test/admin/")),
            Disposition::Bypass(BypassReason::Admin)
        );
        assert_eq!(
            router.route(&get("https://gym.test/admin/static/app.css")),
            Disposition::Bypass(BypassReason::Admin)
        );
    }

    #[test]
    fn test_foreign_paths_are_bypassed() {
        let router = portal();
        for url in [
            "https://gym.test/",
            "https://gym.test/public/",
            "https://gym.test/api/clients/",
            "https://gym.test/portalx/",
            "https://cdn.tailwindcss.com/",
        ] {
            assert_eq!(
                router.route(&get(url)),
                Disposition::Bypass(BypassReason::OutOfScope),
                "{url}"
            );
        }
    }

    #[test]
    fn test_navigation_wins_over_static() {
        let router = portal();
        assert_eq!(
            router.route(&nav("https://gym.test/portal/profile/")),
            Disposition::Dispatch(Strategy::Navigation)
        );
        assert_eq!(
            router.route(&nav("https://gym.test/static/manifest_portal.json")),
            Disposition::Dispatch(Strategy::Navigation)
        );
    }

    #[test]
    fn test_static_and_cdn_are_cache_first() {
        let router = portal();
        assert_eq!(
            router.route(&get("https://gym.test/static/icons/icon-72x72.png")),
            Disposition::Dispatch(Strategy::CacheFirst)
        );
        assert_eq!(
            router.route(&get("https://cdn.jsdelivr.net/portal/lib.js")),
            Disposition::Dispatch(Strategy::CacheFirst)
        );
    }

    #[test]
    fn test_other_routed_requests_are_network_first() {
        let router = portal();
        let disposition = router.route(&get("https://gym.test/portal/api/bookings/"));
        assert_eq!(disposition, Disposition::Dispatch(Strategy::NetworkFirst));
        assert_eq!(disposition.strategy(), Some(Strategy::NetworkFirst));
    }

    #[test]
    fn test_public_router_uses_its_prefix() {
        let router = Router::new(&WorkerConfig::public());
        assert_eq!(
            router.route(&nav("https://gym.test/public/classes/")),
            Disposition::Dispatch(Strategy::Navigation)
        );
        assert_eq!(
            router.route(&nav("https://gym.test/portal/")),
            Disposition::Bypass(BypassReason::OutOfScope)
        );
    }

    #[test]
    fn test_disposition_serializes() {
        let json = serde_json::to_value(Disposition::Dispatch(Strategy::CacheFirst)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "disposition": "dispatch", "detail": "cache_first" })
        );
    }
}
