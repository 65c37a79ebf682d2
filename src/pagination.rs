//! Page-number pagination for list responses.
//!
//! Query parameters are parsed leniently: anything that is not a positive
//! integer falls back to the default, page sizes are clamped to the
//! configured maximum, and pages past the end resolve to the last page.

use axum::http::{header, HeaderMap, Uri};
use serde::Serialize;

pub const PAGE_PARAM: &str = "page";
pub const PAGE_SIZE_PARAM: &str = "page_size";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageSettings {
    pub default_size: u64,
    pub max_size: u64,
}

/// A resolved page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u64,
    pub page_size: u64,
}

impl PageRequest {
    pub fn from_query(pairs: &[(String, String)], settings: PageSettings) -> Self {
        let page = lookup(pairs, PAGE_PARAM)
            .and_then(parse_positive)
            .unwrap_or(1);
        let page_size = lookup(pairs, PAGE_SIZE_PARAM)
            .and_then(parse_positive)
            .unwrap_or(settings.default_size)
            .min(settings.max_size)
            .max(1);

        Self { page, page_size }
    }

    /// Number of pages needed for `count` items; an empty set still has one.
    pub fn last_page(&self, count: u64) -> u64 {
        count.div_ceil(self.page_size).max(1)
    }

    /// The same request with `page` pulled back inside `count` items.
    pub fn clamp_to(self, count: u64) -> Self {
        Self {
            page: self.page.min(self.last_page(count)),
            ..self
        }
    }

    pub fn offset(&self) -> u64 {
        (self.page - 1).saturating_mul(self.page_size)
    }
}

/// One page of results with links to its neighbours.
#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub count: u64,
    pub next: Option<String>,
    pub previous: Option<String>,
    pub results: Vec<T>,
}

impl<T> Page<T> {
    pub fn new(results: Vec<T>, count: u64, request: PageRequest, links: &PageLinks) -> Self {
        let next = (request.page < request.last_page(count)).then(|| links.to_page(request.page + 1));
        let previous = (request.page > 1).then(|| links.to_page(request.page - 1));

        Self {
            count,
            next,
            previous,
            results,
        }
    }
}

/// Builds neighbour-page URLs from the request URL, keeping every query
/// parameter other than `page` as the client sent it.
#[derive(Debug, Clone)]
pub struct PageLinks {
    base: String,
    retained: Vec<String>,
}

impl PageLinks {
    pub fn from_request(headers: &HeaderMap, uri: &Uri, trust_forwarded_headers: bool) -> Self {
        let base = match request_origin(headers, uri, trust_forwarded_headers) {
            Some(origin) => format!("{}{}", origin, uri.path()),
            None => uri.path().to_string(),
        };

        let retained = uri
            .query()
            .unwrap_or_default()
            .split('&')
            .filter(|segment| !segment.is_empty())
            .filter(|segment| segment.split('=').next() != Some(PAGE_PARAM))
            .map(str::to_string)
            .collect();

        Self { base, retained }
    }

    /// URL of `page`. Page 1 carries no `page` parameter.
    pub fn to_page(&self, page: u64) -> String {
        let mut segments = self.retained.clone();
        if page > 1 {
            segments.push(format!("{}={}", PAGE_PARAM, page));
        }

        if segments.is_empty() {
            self.base.clone()
        } else {
            format!("{}?{}", self.base, segments.join("&"))
        }
    }
}

/// `scheme://host` the client addressed, from the `Host` header or the
/// request target. `X-Forwarded-Proto` is read only from trusted proxies.
pub fn request_origin(headers: &HeaderMap, uri: &Uri, trust_forwarded_headers: bool) -> Option<String> {
    let host = headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .or_else(|| uri.authority().map(|authority| authority.as_str()))?;
    let forwarded_proto = headers
        .get("x-forwarded-proto")
        .filter(|_| trust_forwarded_headers)
        .and_then(|value| value.to_str().ok())
        .filter(|proto| *proto == "http" || *proto == "https");
    let scheme = forwarded_proto.or_else(|| uri.scheme_str()).unwrap_or("http");

    Some(format!("{}://{}", scheme, host))
}

/// Last value supplied for `name`.
pub fn lookup<'a>(pairs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    pairs
        .iter()
        .rev()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

fn parse_positive(value: &str) -> Option<u64> {
    value.trim().parse::<u64>().ok().filter(|n| *n > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const SETTINGS: PageSettings = PageSettings {
        default_size: 100,
        max_size: 1000,
    };

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let request = PageRequest::from_query(&[], SETTINGS);
        assert_eq!(request, PageRequest { page: 1, page_size: 100 });
        assert_eq!(request.offset(), 0);
    }

    #[test]
    fn test_malformed_values_fall_back() {
        let request = PageRequest::from_query(
            &pairs(&[("page", "abc"), ("page_size", "-5")]),
            SETTINGS,
        );
        assert_eq!(request, PageRequest { page: 1, page_size: 100 });

        let request = PageRequest::from_query(&pairs(&[("page", "0"), ("page_size", "0")]), SETTINGS);
        assert_eq!(request, PageRequest { page: 1, page_size: 100 });
    }

    #[test]
    fn test_page_size_is_clamped() {
        let request = PageRequest::from_query(&pairs(&[("page_size", "5000")]), SETTINGS);
        assert_eq!(request.page_size, 1000);
    }

    #[test]
    fn test_page_past_end_is_clamped() {
        let request = PageRequest::from_query(&pairs(&[("page", "9"), ("page_size", "10")]), SETTINGS);
        let request = request.clamp_to(25);
        assert_eq!(request.page, 3);
        assert_eq!(request.offset(), 20);

        assert_eq!(request.clamp_to(0).page, 1);
    }

    #[test]
    fn test_links_keep_other_parameters() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("example.com"));
        let uri: Uri = "/api/elements/?page_size=2&page=2&block=s".parse().unwrap();
        let links = PageLinks::from_request(&headers, &uri, false);

        assert_eq!(
            links.to_page(3),
            "http://example.com/api/elements/?page_size=2&block=s&page=3"
        );
        assert_eq!(links.to_page(1), "http://example.com/api/elements/?page_size=2&block=s");
    }

    #[test]
    fn test_forwarded_proto_needs_trust() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("example.com"));
        headers.insert("x-forwarded-proto", HeaderValue::from_static("https"));
        let uri: Uri = "/api/elements/".parse().unwrap();

        assert_eq!(
            request_origin(&headers, &uri, false).as_deref(),
            Some("http://example.com")
        );
        assert_eq!(
            request_origin(&headers, &uri, true).as_deref(),
            Some("https://example.com")
        );
        assert_eq!(request_origin(&HeaderMap::new(), &uri, true), None);
    }

    #[test]
    fn test_page_links_null_at_edges() {
        let links = PageLinks::from_request(&HeaderMap::new(), &"/api/elements/".parse().unwrap(), false);

        let only = Page::new(vec![1, 2], 2, PageRequest { page: 1, page_size: 100 }, &links);
        assert!(only.next.is_none());
        assert!(only.previous.is_none());

        let middle = Page::new(vec![3, 4], 6, PageRequest { page: 2, page_size: 2 }, &links);
        assert_eq!(middle.next.as_deref(), Some("/api/elements/?page=3"));
        assert_eq!(middle.previous.as_deref(), Some("/api/elements/"));
    }
}
