//! Cache Storage: named caches of request → response entries.
//!
//! Entries are keyed by method and full URL. Writes are last-write-wins;
//! nothing is evicted per entry, only whole caches are deleted.

use std::sync::Arc;

use gymkit_net::{Request, Response};
use hashbrown::HashMap;
use http::{HeaderName, HeaderValue, Method, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use url::Url;

use crate::ServiceWorkerError;

/// Cache storage shared by every worker and tab of an origin.
pub type SharedCacheStorage = Arc<RwLock<CacheStorage>>;

/// Key of a cached request.
pub fn cache_key(method: &Method, url: &Url) -> String {
    format!("{} {}", method, url)
}

/// A cached request/response pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request URL.
    pub url: String,

    /// Request method.
    pub method: String,

    /// Response status.
    pub status: u16,

    /// Response headers.
    pub headers: HashMap<String, String>,

    /// Response body.
    pub body: Vec<u8>,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CacheEntry {
    /// Capture a response for `request`.
    pub fn from_response(request: &Request, response: &Response) -> Self {
        let headers = response
            .headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        Self {
            url: request.url.to_string(),
            method: request.method.to_string(),
            status: response.status.as_u16(),
            headers,
            body: response.body().to_vec(),
            cached_at: crate::now_millis(),
        }
    }

    pub fn key(&self) -> String {
        format!("{} {}", self.method, self.url)
    }

    /// Rebuild a response marked as served from cache.
    pub fn to_response(&self) -> Result<Response, ServiceWorkerError> {
        let url = Url::parse(&self.url)?;
        let status = StatusCode::from_u16(self.status)
            .map_err(|e| ServiceWorkerError::CacheError(format!("{}: {e}", self.url)))?;

        let mut response = Response::new(url, status, self.body.clone()).from_cache();
        for (name, value) in &self.headers {
            if let (Ok(n), Ok(v)) = (
                HeaderName::try_from(name.as_str()),
                HeaderValue::try_from(value.as_str()),
            ) {
                response.headers.insert(n, v);
            }
        }
        Ok(response)
    }
}

// ==================== Cache ====================

/// A cache instance.
#[derive(Debug, Default)]
pub struct Cache {
    /// Cache name.
    pub name: String,

    /// Cached entries.
    entries: HashMap<String, CacheEntry>,
}

impl Cache {
    /// Create a new cache.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
        }
    }

    /// Match a request exactly (method and full URL).
    pub fn match_request(&self, request: &Request) -> Option<&CacheEntry> {
        self.entries.get(&cache_key(&request.method, &request.url))
    }

    /// Add entry, replacing any previous one for the same key.
    pub fn put(&mut self, entry: CacheEntry) {
        self.entries.insert(entry.key(), entry);
    }

    /// Delete entry.
    pub fn delete(&mut self, request: &Request) -> bool {
        self.entries
            .remove(&cache_key(&request.method, &request.url))
            .is_some()
    }

    /// Get all keys.
    pub fn keys(&self) -> Vec<&str> {
        self.entries.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ==================== Cache Storage ====================

/// Cache storage (the `caches` global).
#[derive(Debug, Default)]
pub struct CacheStorage {
    caches: HashMap<String, Cache>,
    /// Names in creation order.
    order: Vec<String>,
}

impl CacheStorage {
    /// Create new cache storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create new cache storage behind a shared lock.
    pub fn shared() -> SharedCacheStorage {
        Arc::new(RwLock::new(Self::new()))
    }

    /// Open a cache (creates if doesn't exist).
    pub fn open(&mut self, name: &str) -> &mut Cache {
        if !self.caches.contains_key(name) {
            self.order.push(name.to_string());
        }
        self.caches
            .entry(name.to_string())
            .or_insert_with(|| Cache::new(name))
    }

    /// Get a cache without creating it.
    pub fn get(&self, name: &str) -> Option<&Cache> {
        self.caches.get(name)
    }

    /// Check if cache exists.
    pub fn has(&self, name: &str) -> bool {
        self.caches.contains_key(name)
    }

    /// Delete a cache.
    pub fn delete(&mut self, name: &str) -> bool {
        self.order.retain(|n| n != name);
        self.caches.remove(name).is_some()
    }

    /// All cache names, in creation order.
    pub fn keys(&self) -> Vec<String> {
        self.order.clone()
    }

    /// Match across all caches, oldest cache first.
    pub fn match_request(&self, request: &Request) -> Option<&CacheEntry> {
        self.order
            .iter()
            .filter_map(|name| self.caches.get(name))
            .find_map(|cache| cache.match_request(request))
    }

    /// Match within one named cache.
    pub fn match_in(&self, name: &str, request: &Request) -> Option<&CacheEntry> {
        self.caches.get(name)?.match_request(request)
    }

    /// Store `entry` into the named cache, creating it if needed.
    pub fn put(&mut self, name: &str, entry: CacheEntry) {
        self.open(name).put(entry);
    }
}
