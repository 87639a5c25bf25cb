//! Request identity and client address.
//!
//! # Responsibilities
//! - Propagate or generate the `x-request-id` of every request
//! - Resolve the client address (forwarding headers, then socket peer)
//!
//! # Design Decisions
//! - Request ID assigned as early as possible so every later stage sees it
//! - Inbound ids are trusted only if they are short, printable header values

use std::fmt;
use std::net::SocketAddr;

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

pub const X_REQUEST_ID: &str = "x-request-id";

const MAX_INBOUND_ID_LEN: usize = 128;

/// Identifier of one request, stored in request extensions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId(String);

impl RequestId {
    /// Fresh UUID v4 identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn from_header(value: &HeaderValue) -> Option<Self> {
        let s = value.to_str().ok()?.trim();
        (!s.is_empty() && s.len() <= MAX_INBOUND_ID_LEN).then(|| Self(s.to_string()))
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Extension trait to read the assigned request id.
pub trait RequestIdExt {
    fn request_id(&self) -> Option<&RequestId>;
}

impl<B> RequestIdExt for Request<B> {
    fn request_id(&self) -> Option<&RequestId> {
        self.extensions().get::<RequestId>()
    }
}

/// Middleware body for the `request_id` registry entry.
pub async fn assign_request_id(mut request: Request<Body>, next: Next) -> Response {
    let id = request
        .headers()
        .get(X_REQUEST_ID)
        .and_then(RequestId::from_header)
        .unwrap_or_else(RequestId::generate);

    let header = HeaderValue::from_str(id.as_str()).ok();
    if let Some(value) = &header {
        request.headers_mut().insert(X_REQUEST_ID, value.clone());
    }
    request.extensions_mut().insert(id);

    let mut response = next.run(request).await;
    if let Some(value) = header {
        response.headers_mut().insert(X_REQUEST_ID, value);
    }
    response
}

/// Client address: first `X-Forwarded-For` hop, `X-Real-IP`, then the
/// socket peer. Empty if none is known.
pub fn client_ip<B>(request: &Request<B>) -> String {
    let headers = request.headers();

    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').map(str::trim).find(|s| !s.is_empty()));
    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    let real_ip = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty());
    if let Some(ip) = real_ip {
        return ip.to_string();
    }

    peer_ip(request).unwrap_or_default()
}

/// Address of the socket peer, ignoring forwarding headers.
pub fn peer_ip<B>(request: &Request<B>) -> Option<String> {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
}
