//! Time-bounded cache of successful API responses.
//!
//! Entries are keyed by the origin the client addressed, the request path
//! and its query parameters in a canonical order, and are served verbatim
//! until their TTL runs out. The cache holds at most `max_entries` responses;
//! when full, expired entries go first and then the oldest one.

use axum::body::{Body, Bytes};
use axum::extract::Query;
use axum::http::{HeaderMap, HeaderValue, StatusCode, Uri};
use axum::response::Response;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{Mutex as FillLock, OwnedMutexGuard};
use tokio::time::Instant;

#[derive(Clone)]
struct CachedResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    stored_at: Instant,
}

impl CachedResponse {
    fn to_response(&self) -> Response {
        let mut resp = Response::new(Body::from(self.body.clone()));
        *resp.status_mut() = self.status;
        *resp.headers_mut() = self.headers.clone();
        resp
    }
}

type FillLocks = Arc<Mutex<HashMap<String, Arc<FillLock<()>>>>>;

#[derive(Clone)]
pub struct ResponseCache {
    ttl: Duration,
    max_entries: usize,
    entries: Arc<RwLock<HashMap<String, CachedResponse>>>,
    filling: FillLocks,
}

/// Held while one request computes the response for a key. Other requests
/// for the same key wait on it and then find the stored entry.
pub struct FillGuard {
    key: String,
    filling: FillLocks,
    _lock: OwnedMutexGuard<()>,
}

impl Drop for FillGuard {
    fn drop(&mut self) {
        let mut filling = self.filling.lock().unwrap_or_else(PoisonError::into_inner);
        // One reference in the map and one in this guard: nobody is waiting.
        if filling
            .get(&self.key)
            .is_some_and(|lock| Arc::strong_count(lock) <= 2)
        {
            filling.remove(&self.key);
        }
    }
}

impl ResponseCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            ttl,
            max_entries: max_entries.max(1),
            entries: Arc::new(RwLock::new(HashMap::new())),
            filling: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// `Cache-Control` value advertised on cached responses.
    pub fn cache_control(&self) -> HeaderValue {
        HeaderValue::from_str(&format!("public, max-age={}", self.ttl.as_secs()))
            .unwrap_or_else(|_| HeaderValue::from_static("public"))
    }

    /// A fresh copy of the stored response, if one has not expired.
    pub fn get(&self, key: &str) -> Option<Response> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(key)
            .filter(|entry| entry.stored_at.elapsed() < self.ttl)
            .map(CachedResponse::to_response)
    }

    pub fn insert(&self, key: String, status: StatusCode, headers: HeaderMap, body: Bytes) {
        let entry = CachedResponse {
            status,
            headers,
            body,
            stored_at: Instant::now(),
        };
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if !entries.contains_key(&key) && entries.len() >= self.max_entries {
            entries.retain(|_, entry| entry.stored_at.elapsed() < self.ttl);
            if entries.len() >= self.max_entries {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.stored_at)
                    .map(|(key, _)| key.clone());
                if let Some(oldest) = oldest {
                    entries.remove(&oldest);
                }
            }
        }
        entries.insert(key, entry);
    }

    /// Waits until no other request is filling `key`, then claims it.
    pub async fn fill_guard(&self, key: &str) -> FillGuard {
        let lock = self
            .filling
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.to_string())
            .or_default()
            .clone();

        FillGuard {
            key: key.to_string(),
            filling: self.filling.clone(),
            _lock: lock.lock_owned().await,
        }
    }

    #[cfg(test)]
    fn filling_keys(&self) -> usize {
        self.filling.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Drops expired entries and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, entry| entry.stored_at.elapsed() < self.ttl);
        before - entries.len()
    }

    /// Manual flush.
    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Cache key for a request: the origin the client addressed, the path
/// without a trailing slash, then the decoded query pairs in sorted order.
pub fn cache_key(origin: Option<&str>, uri: &Uri) -> String {
    let origin = origin.unwrap_or_default();
    let path = uri.path();
    let path = if path.len() > 1 { path.trim_end_matches('/') } else { path };

    match Query::<Vec<(String, String)>>::try_from_uri(uri) {
        Ok(Query(mut pairs)) => {
            pairs.sort();
            let query = serde_json::to_string(&pairs).unwrap_or_default();
            format!("{}{}?{}", origin, path, query)
        }
        Err(_) => format!("{}{}?raw:{}", origin, path, uri.query().unwrap_or_default()),
    }
}

/// Strong entity tag `"<identity>-<digest>"` for a response body.
pub fn entity_tag(identity: &str, body: &[u8]) -> HeaderValue {
    let mut hasher = DefaultHasher::new();
    body.hash(&mut hasher);
    HeaderValue::from_str(&format!("\"{}-{:016x}\"", identity, hasher.finish()))
        .unwrap_or_else(|_| HeaderValue::from_static("\"element\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header;

    fn uri(s: &str) -> Uri {
        s.parse().unwrap()
    }

    #[test]
    fn test_cache_key_canonicalizes_query_order() {
        assert_eq!(
            cache_key(None, &uri("/api/elements/?page=2&page_size=10")),
            cache_key(None, &uri("/api/elements?page_size=10&page=2"))
        );
        assert_ne!(
            cache_key(None, &uri("/api/elements/?page=2")),
            cache_key(None, &uri("/api/elements/?page=3"))
        );
        assert_ne!(
            cache_key(None, &uri("/api/elements/1/")),
            cache_key(None, &uri("/api/elements/11/"))
        );
    }

    #[test]
    fn test_cache_key_does_not_confuse_encoded_separators() {
        assert_ne!(
            cache_key(None, &uri("/api/elements/?category=a%26page%3D2")),
            cache_key(None, &uri("/api/elements/?category=a&page=2"))
        );
    }

    #[test]
    fn test_entity_tag_is_stable_and_quoted() {
        let first = entity_tag("1", b"{\"symbol\":\"H\"}");
        let second = entity_tag("1", b"{\"symbol\":\"H\"}");
        assert_eq!(first, second);

        let text = first.to_str().unwrap();
        assert!(text.starts_with("\"1-"));
        assert!(text.ends_with('"'));
        assert_ne!(first, entity_tag("2", b"{\"symbol\":\"He\"}"));
    }

    #[test]
    fn test_cache_control_uses_ttl() {
        let cache = ResponseCache::new(Duration::from_secs(3600), 300);
        assert_eq!(cache.cache_control(), "public, max-age=3600");
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_ttl() {
        let cache = ResponseCache::new(Duration::from_secs(60), 300);
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        cache.insert("k".to_string(), StatusCode::OK, headers, Bytes::from_static(b"{}"));

        let hit = cache.get("k").unwrap();
        assert_eq!(hit.status(), StatusCode::OK);
        assert_eq!(hit.headers()[header::CONTENT_TYPE], "application/json");

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(cache.get("k").is_some());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cache.get("k").is_none());
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.purge_expired(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_clear() {
        let cache = ResponseCache::new(Duration::from_secs(60), 300);
        cache.insert("a".to_string(), StatusCode::OK, HeaderMap::new(), Bytes::new());
        cache.insert("b".to_string(), StatusCode::OK, HeaderMap::new(), Bytes::new());
        assert_eq!(cache.len(), 2);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_cache_key_includes_origin() {
        let target = uri("/api/elements/?page_size=3");
        assert_ne!(
            cache_key(Some("http://evil.example"), &target),
            cache_key(Some("http://api.real.org"), &target)
        );
        assert_ne!(
            cache_key(Some("https://api.real.org"), &target),
            cache_key(Some("http://api.real.org"), &target)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_cache_evicts_oldest_entry() {
        let cache = ResponseCache::new(Duration::from_secs(60), 3);
        for key in ["a", "b", "c"] {
            cache.insert(key.to_string(), StatusCode::OK, HeaderMap::new(), Bytes::new());
            tokio::time::advance(Duration::from_secs(1)).await;
        }

        cache.insert("d".to_string(), StatusCode::OK, HeaderMap::new(), Bytes::new());
        assert_eq!(cache.len(), 3);
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
        assert!(cache.get("d").is_some());

        // Replacing a stored key never evicts.
        cache.insert("b".to_string(), StatusCode::OK, HeaderMap::new(), Bytes::new());
        assert_eq!(cache.len(), 3);
        assert!(cache.get("c").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_cache_drops_expired_entries_first() {
        let cache = ResponseCache::new(Duration::from_secs(60), 2);
        cache.insert("old".to_string(), StatusCode::OK, HeaderMap::new(), Bytes::new());
        tokio::time::advance(Duration::from_secs(61)).await;
        cache.insert("fresh".to_string(), StatusCode::OK, HeaderMap::new(), Bytes::new());

        cache.insert("new".to_string(), StatusCode::OK, HeaderMap::new(), Bytes::new());
        assert_eq!(cache.len(), 2);
        assert!(cache.get("fresh").is_some());
        assert!(cache.get("new").is_some());
    }

    #[tokio::test]
    async fn test_fill_guard_serializes_same_key() {
        let cache = ResponseCache::new(Duration::from_secs(60), 10);
        let guard = cache.fill_guard("k").await;

        let waiter = {
            let cache = cache.clone();
            tokio::spawn(async move {
                let _guard = cache.fill_guard("k").await;
                cache.get("k").is_some()
            })
        };
        tokio::task::yield_now().await;

        // A different key is not blocked.
        drop(cache.fill_guard("other").await);

        cache.insert("k".to_string(), StatusCode::OK, HeaderMap::new(), Bytes::new());
        drop(guard);
        assert!(waiter.await.unwrap());
        assert_eq!(cache.filling_keys(), 0);
    }
}
