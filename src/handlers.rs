use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, Uri},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tokio::time::Instant;

use crate::client_identity::IdentityResolver;
use crate::config::Config;
use crate::error::{ApiError, Result};
use crate::health::HealthChecker;
use crate::pagination::{lookup, Page, PageLinks, PageRequest, PageSettings};
use crate::response_cache::{entity_tag, ResponseCache};
use crate::store::{ElementFilter, ElementQuery, ElementStore, FieldRange};
use crate::throttle::Throttle;

/// Shared application state
pub type SharedState = Arc<AppState>;

/// Application state: the store plus the process-wide cache and throttle.
pub struct AppState {
    pub store: Arc<dyn ElementStore>,
    pub cache: ResponseCache,
    pub throttle: Throttle,
    pub identity: IdentityResolver,
    pub pages: PageSettings,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(store: Arc<dyn ElementStore>, config: &Config) -> SharedState {
        Arc::new(Self {
            store,
            cache: ResponseCache::new(config.cache_ttl, config.cache_max_entries),
            throttle: Throttle::new(config.anon_rate, config.user_rate),
            identity: IdentityResolver::new(
                config.api_keys.iter().cloned(),
                config.trust_forwarded_headers,
            ),
            pages: PageSettings {
                default_size: config.page_size,
                max_size: config.max_page_size,
            },
            started_at: Instant::now(),
        })
    }
}

/// Classification filters from the list query. Malformed values are ignored.
fn filter_from_query(pairs: &[(String, String)]) -> ElementFilter {
    let text = |name: &str| {
        lookup(pairs, name)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    };
    let number = |name: &str| {
        lookup(pairs, name)
            .and_then(|value| value.trim().parse::<u32>().ok())
            .map(FieldRange::exactly)
    };

    ElementFilter {
        category: text("category"),
        block: text("block"),
        period: number("period"),
        group: number("group"),
    }
}

fn json_response(body: Vec<u8>, etag: HeaderValue) -> Response {
    let mut resp = body.into_response();
    let headers = resp.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(header::ETAG, etag);
    resp
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| ApiError::Internal(e.to_string()))
}

/// List elements, one page at a time, in ascending atomic number order
pub async fn list_elements(
    State(state): State<SharedState>,
    headers: HeaderMap,
    uri: Uri,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<Response> {
    let filter = filter_from_query(&pairs);
    let request = PageRequest::from_query(&pairs, state.pages);

    let store = state.store.clone();
    let (count, request, elements) = tokio::task::spawn_blocking(move || {
        let count = store.count(&filter)?;
        let request = request.clamp_to(count);
        let elements = store.list(&ElementQuery {
            filter,
            limit: Some(request.page_size),
            offset: request.offset(),
            ..Default::default()
        })?;
        Ok::<_, ApiError>((count, request, elements))
    })
    .await??;

    tracing::debug!(
        count,
        page = request.page,
        page_size = request.page_size,
        returned = elements.len(),
        "Listed elements"
    );

    let links = PageLinks::from_request(
        &headers,
        &uri,
        state.identity.trusts_forwarded_headers(),
    );
    let body = to_json(&Page::new(elements, count, request, &links))?;
    let etag = entity_tag("elements", &body);
    Ok(json_response(body, etag))
}

/// Get one element by atomic number
pub async fn get_element(
    State(state): State<SharedState>,
    Path(atomic_number): Path<String>,
) -> Result<Response> {
    // Anything that is not a positive integer cannot be a store key.
    let atomic_number = atomic_number
        .parse::<u32>()
        .ok()
        .filter(|n| *n > 0)
        .ok_or(ApiError::ElementNotFound)?;

    let store = state.store.clone();
    let element = tokio::task::spawn_blocking(move || store.get(atomic_number)).await??;

    let body = to_json(&element)?;
    let etag = entity_tag(&element.atomic_number.to_string(), &body);
    Ok(json_response(body, etag))
}

/// Health check endpoint
pub async fn health_check(State(state): State<SharedState>) -> impl IntoResponse {
    let checker = HealthChecker::new(state);
    Json(checker.check_health().await)
}

/// Fallback for unknown routes
pub async fn not_found() -> ApiError {
    ApiError::RouteNotFound
}
