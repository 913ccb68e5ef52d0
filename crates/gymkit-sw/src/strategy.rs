//! Fetch/cache strategies.
//!
//! Only `ok` network responses are stored, always into the worker's own
//! cache. Fallback lookups search every cache of the origin in creation
//! order. The store happens on a detached task holding its own copy of the
//! response, so the requester never waits on it and never sees its outcome.

use gymkit_net::{Fetcher, Request, Response};
use tracing::{debug, warn};
use url::Url;

use crate::cache::{CacheEntry, SharedCacheStorage};
use crate::router::Strategy;
use crate::ServiceWorkerError;

/// Everything a strategy needs from its worker.
pub struct StrategyContext<'a> {
    pub label: &'a str,
    pub cache_name: &'a str,
    pub offline_page: &'a Url,
    pub storage: &'a SharedCacheStorage,
    pub fetcher: &'a dyn Fetcher,
}

/// Answer `request` with `strategy`.
pub async fn respond(
    ctx: &StrategyContext<'_>,
    strategy: Strategy,
    request: &Request,
) -> Result<Response, ServiceWorkerError> {
    match strategy {
        Strategy::Navigation => navigation(ctx, request).await,
        Strategy::CacheFirst => cache_first(ctx, request).await,
        Strategy::NetworkFirst => network_first(ctx, request).await,
    }
}

/// Network first; on failure the cached page, then the offline page.
pub async fn navigation(
    ctx: &StrategyContext<'_>,
    request: &Request,
) -> Result<Response, ServiceWorkerError> {
    match ctx.fetcher.fetch(request).await {
        Ok(response) => {
            store_in_background(ctx, request, &response);
            Ok(response)
        }
        Err(error) => {
            warn!(label = ctx.label, url = %request.url, %error, "Navigation failed, serving from cache");

            if let Some(cached) = lookup(ctx, request).await? {
                return Ok(cached);
            }

            let offline = Request::get(ctx.offline_page.clone());
            match lookup(ctx, &offline).await? {
                Some(page) => {
                    debug!(label = ctx.label, url = %request.url, "Serving offline page");
                    Ok(page)
                }
                None => Err(ServiceWorkerError::NoResponse(request.url.to_string())),
            }
        }
    }
}

/// Cache first; on a miss the network, whose failure propagates.
pub async fn cache_first(
    ctx: &StrategyContext<'_>,
    request: &Request,
) -> Result<Response, ServiceWorkerError> {
    if let Some(cached) = lookup(ctx, request).await? {
        return Ok(cached);
    }

    let response = ctx.fetcher.fetch(request).await?;
    store_in_background(ctx, request, &response);
    Ok(response)
}

/// Network first; on failure the exact cached copy, else the failure.
pub async fn network_first(
    ctx: &StrategyContext<'_>,
    request: &Request,
) -> Result<Response, ServiceWorkerError> {
    match ctx.fetcher.fetch(request).await {
        Ok(response) => {
            store_in_background(ctx, request, &response);
            Ok(response)
        }
        Err(error) => {
            debug!(label = ctx.label, url = %request.url, %error, "Network failed, trying cache");
            lookup(ctx, request).await?.ok_or(ServiceWorkerError::Network(error))
        }
    }
}

async fn lookup(
    ctx: &StrategyContext<'_>,
    request: &Request,
) -> Result<Option<Response>, ServiceWorkerError> {
    let storage = ctx.storage.read().await;
    storage
        .match_request(request)
        .map(CacheEntry::to_response)
        .transpose()
}

fn store_in_background(ctx: &StrategyContext<'_>, request: &Request, response: &Response) {
    if !response.ok() {
        return;
    }

    let copy = response.duplicate();
    let request = request.clone();
    let storage = ctx.storage.clone();
    let cache_name = ctx.cache_name.to_string();

    tokio::spawn(async move {
        let entry = CacheEntry::from_response(&request, &copy);
        let key = entry.key();
        storage.write().await.put(&cache_name, entry);
        debug!(cache = %cache_name, %key, "Stored response");
    });
}
