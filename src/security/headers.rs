//! Security and cache-control response headers.
//!
//! # Responsibilities
//! - `secure`: clickjacking, MIME sniffing and XSS protection headers; HSTS
//!   for requests that arrived over HTTPS
//! - `nocache`: forbid caching of API responses
//!
//! # Design Decisions
//! - Headers are set after the handler runs, overriding handler values
//! - HTTPS is detected from the URI scheme or a forwarded `X-Forwarded-Proto`

use axum::{
    body::Body,
    http::{
        header::{
            CACHE_CONTROL, EXPIRES, LAST_MODIFIED, STRICT_TRANSPORT_SECURITY, X_CONTENT_TYPE_OPTIONS,
            X_FRAME_OPTIONS, X_XSS_PROTECTION,
        },
        HeaderValue, Request,
    },
    middleware::Next,
    response::Response,
};

const NO_CACHE: &str = "no-cache, no-store, max-age=0, must-revalidate, value";
const EPOCH: &str = "Thu, 01 Jan 1970 00:00:00 GMT";
const HSTS: &str = "max-age=31536000";
const HTTP_DATE: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Middleware body for the `secure` registry entry.
pub async fn secure(request: Request<Body>, next: Next) -> Response {
    let https = is_https(&request);
    let mut response = next.run(request).await;

    let headers = response.headers_mut();
    headers.insert(X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    headers.insert(X_XSS_PROTECTION, HeaderValue::from_static("1; mode=block"));
    if https {
        headers.insert(STRICT_TRANSPORT_SECURITY, HeaderValue::from_static(HSTS));
    }
    response
}

/// Middleware body for the `nocache` registry entry.
pub async fn nocache(request: Request<Body>, next: Next) -> Response {
    let mut response = next.run(request).await;

    let headers = response.headers_mut();
    headers.insert(CACHE_CONTROL, HeaderValue::from_static(NO_CACHE));
    headers.insert(EXPIRES, HeaderValue::from_static(EPOCH));
    let now = chrono::Utc::now().format(HTTP_DATE).to_string();
    if let Ok(value) = HeaderValue::from_str(&now) {
        headers.insert(LAST_MODIFIED, value);
    }
    response
}

fn is_https<B>(request: &Request<B>) -> bool {
    if request.uri().scheme_str() == Some("https") {
        return true;
    }
    request
        .headers()
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("https"))
}
