//! Client identification for throttling.

use axum::http::{header, HeaderMap};
use std::collections::HashSet;
use std::net::SocketAddr;

/// Who a request is throttled as.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ClientIdentity {
    /// Identified by network address
    Anonymous(String),
    /// Identified by a recognised API key
    Authenticated(String),
}

impl ClientIdentity {
    /// Loggable client class. Never the credential itself.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientIdentity::Anonymous(_) => "anonymous",
            ClientIdentity::Authenticated(_) => "authenticated",
        }
    }
}

/// Resolves a request's headers and peer address into a `ClientIdentity`.
#[derive(Debug, Clone, Default)]
pub struct IdentityResolver {
    api_keys: HashSet<String>,
    trust_forwarded_headers: bool,
}

impl IdentityResolver {
    pub fn new<I>(api_keys: I, trust_forwarded_headers: bool) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        Self {
            api_keys: api_keys
                .into_iter()
                .map(|key| key.trim().to_string())
                .filter(|key| !key.is_empty())
                .collect(),
            trust_forwarded_headers,
        }
    }

    pub fn trusts_forwarded_headers(&self) -> bool {
        self.trust_forwarded_headers
    }

    pub fn resolve(&self, headers: &HeaderMap, peer: Option<SocketAddr>) -> ClientIdentity {
        match presented_credential(headers) {
            Some(key) if self.api_keys.contains(key) => {
                ClientIdentity::Authenticated(key.to_string())
            }
            _ => ClientIdentity::Anonymous(self.client_address(headers, peer)),
        }
    }

    /// Client address, from forwarding headers when they are trusted and
    /// from the socket peer otherwise.
    pub fn client_address(&self, headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
        if self.trust_forwarded_headers {
            if let Some(forwarded) = header_str(headers, "x-forwarded-for") {
                if let Some(first_ip) = forwarded.split(',').next() {
                    let first_ip = first_ip.trim();
                    if !first_ip.is_empty() {
                        return first_ip.to_string();
                    }
                }
            }

            if let Some(real_ip) = header_str(headers, "x-real-ip") {
                return real_ip.trim().to_string();
            }
        }

        peer.map(|addr| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// API key from `Authorization: Bearer <key>` or `X-Api-Key`.
fn presented_credential(headers: &HeaderMap) -> Option<&str> {
    header_str(headers, header::AUTHORIZATION.as_str())
        .and_then(|value| value.strip_prefix("Bearer "))
        .or_else(|| header_str(headers, "x-api-key"))
        .map(str::trim)
        .filter(|key| !key.is_empty())
}
