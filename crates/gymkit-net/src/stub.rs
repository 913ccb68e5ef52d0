//! Scripted in-memory [`Fetcher`] for tests.
//!
//! Routes are keyed by full URL. Unscripted URLs answer `404 Not Found`,
//! like a real origin would. Switching the fetcher offline makes every
//! request fail without reaching any route.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use bytes::Bytes;
use http::{Method, StatusCode};
use tracing::trace;
use url::Url;

use crate::{FetchFuture, Fetcher, NetError, Request, Response};

#[derive(Debug, Clone)]
enum StubRoute {
    Respond { status: StatusCode, body: Bytes },
    Fail(String),
}

/// A recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StubCall {
    pub method: Method,
    pub url: Url,
}

/// Scripted fetcher with per-URL call accounting.
#[derive(Debug, Default)]
pub struct StubFetcher {
    routes: Mutex<HashMap<String, StubRoute>>,
    calls: Mutex<Vec<StubCall>>,
    offline: AtomicBool,
    latency: Mutex<Option<Duration>>,
}

impl StubFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `url` with `status` and `body`.
    pub fn respond(&self, url: &str, status: u16, body: impl Into<Bytes>) -> &Self {
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        self.lock_routes().insert(
            url.to_string(),
            StubRoute::Respond {
                status,
                body: body.into(),
            },
        );
        self
    }

    /// Fail every request for `url` with a network error.
    pub fn fail(&self, url: &str) -> &Self {
        self.lock_routes()
            .insert(url.to_string(), StubRoute::Fail(format!("connection reset: {url}")));
        self
    }

    /// Toggle the whole network off or on.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Delay every answer.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock().unwrap_or_else(|e| e.into_inner()) = latency;
    }

    /// All calls made so far, in order.
    pub fn calls(&self) -> Vec<StubCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of calls made for `url`.
    pub fn call_count(&self, url: &str) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|c| c.url.as_str() == url)
            .count()
    }

    /// Number of calls made for any URL.
    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn lock_routes(&self) -> std::sync::MutexGuard<'_, HashMap<String, StubRoute>> {
        self.routes.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn answer(&self, request: &Request) -> Result<Response, NetError> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(StubCall {
                method: request.method.clone(),
                url: request.url.clone(),
            });

        if self.offline.load(Ordering::SeqCst) {
            return Err(NetError::Offline(request.url.to_string()));
        }

        let route = self.lock_routes().get(request.url.as_str()).cloned();
        trace!(url = %request.url, route = ?route, "Stub answering");

        match route {
            Some(StubRoute::Respond { status, body }) => {
                Ok(Response::new(request.url.clone(), status, body))
            }
            Some(StubRoute::Fail(reason)) => Err(NetError::RequestFailed(reason)),
            None => Ok(Response::new(
                request.url.clone(),
                StatusCode::NOT_FOUND,
                Bytes::new(),
            )),
        }
    }
}

impl Fetcher for StubFetcher {
    fn fetch<'a>(&'a self, request: &'a Request) -> FetchFuture<'a> {
        let result = self.answer(request);
        let latency = *self.latency.lock().unwrap_or_else(|e| e.into_inner());
        Box::pin(async move {
            if let Some(delay) = latency {
                tokio::time::sleep(delay).await;
            }
            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get(url: &str) -> Request {
        Request::get(Url::parse(url).unwrap())
    }

    #[tokio::test]
    async fn test_scripted_routes() {
        let stub = StubFetcher::new();
        stub.respond("https://gym.test/portal/", 200, "portal")
            .fail("https://gym.test/broken/");

        let ok = stub.fetch(&get("https://gym.test/portal/")).await.unwrap();
        assert!(ok.ok());

        assert!(stub.fetch(&get("https://gym.test/broken/")).await.is_err());

        let missing = stub.fetch(&get("https://gym.test/nope/")).await.unwrap();
        assert_eq!(missing.status, StatusCode::NOT_FOUND);

        assert_eq!(stub.total_calls(), 3);
        assert_eq!(stub.call_count("https://gym.test/portal/"), 1);
    }

    #[tokio::test]
    async fn test_offline_switch() {
        let stub = StubFetcher::new();
        stub.respond("https://gym.test/portal/", 200, "portal");
        stub.set_offline(true);

        let err = stub.fetch(&get("https://gym.test/portal/")).await.unwrap_err();
        assert!(matches!(err, NetError::Offline(_)));

        stub.set_offline(false);
        assert!(stub.fetch(&get("https://gym.test/portal/")).await.is_ok());
    }
}
