//! Transparent response cache.
//!
//! An optional middleware in front of the render handler: successful GET
//! responses are kept in an in-memory LRU keyed by request URI and replayed
//! while fresh. The handler underneath stays a plain axum handler and is
//! unaware of the layer.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::body::{to_bytes, Body, Bytes};
use axum::extract::{Request, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use lru::LruCache;
use tracing::debug;

use crate::server::AppState;

/// Cache status header, mirrored into the access log.
pub const CACHE_HEADER: &str = "x-cache";

// Bodies above this size are served but not cached.
const MAX_CACHED_BODY: usize = 32 * 1024 * 1024;

#[derive(Clone)]
struct CachedResponse {
    headers: HeaderMap,
    body: Bytes,
    stored_at: Instant,
}

/// LRU of fresh, successful GET responses.
#[derive(Clone)]
pub struct ResponseCache {
    inner: Arc<Mutex<LruCache<String, CachedResponse>>>,
    max_age: Duration,
}

impl ResponseCache {
    pub fn new(capacity: usize, max_age: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("non-zero capacity");
        Self {
            inner: Arc::new(Mutex::new(LruCache::new(capacity))),
            max_age,
        }
    }

    fn lookup(&self, key: &str) -> Option<CachedResponse> {
        let mut cache = self.inner.lock().expect("cache lock poisoned");
        match cache.get(key) {
            Some(entry) if entry.stored_at.elapsed() <= self.max_age => Some(entry.clone()),
            Some(_) => {
                cache.pop(key);
                None
            }
            None => None,
        }
    }

    fn store(&self, key: String, headers: HeaderMap, body: Bytes) {
        if body.len() > MAX_CACHED_BODY {
            return;
        }
        let mut cache = self.inner.lock().expect("cache lock poisoned");
        cache.put(
            key,
            CachedResponse {
                headers,
                body,
                stored_at: Instant::now(),
            },
        );
    }
}

/// Middleware wrapping the render handler with the response cache.
pub async fn response_cache(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(cache) = state.cache.clone() else {
        return next.run(request).await;
    };
    if request.method() != Method::GET {
        return next.run(request).await;
    }

    let key = request.uri().to_string();
    if let Some(hit) = cache.lookup(&key) {
        debug!(key = %key, "response cache hit");
        let mut response = Response::new(Body::from(hit.body));
        *response.headers_mut() = hit.headers;
        response
            .headers_mut()
            .insert(CACHE_HEADER, "HIT".parse().expect("static header value"));
        return response;
    }

    let response = next.run(request).await;
    if response.status() != StatusCode::OK {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(_) => {
            let mut response =
                Response::new(Body::from("500 Internal Server Error (buffer-failed)"));
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            return response;
        }
    };
    cache.store(key, parts.headers.clone(), bytes.clone());
    parts
        .headers
        .insert(CACHE_HEADER, "MISS".parse().expect("static header value"));
    Response::from_parts(parts, Body::from(bytes))
}
