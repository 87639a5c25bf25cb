//! Panic recovery.
//!
//! A panicking handler is turned into `500` with business code `10002`;
//! the payload is logged with the request line.

use std::any::Any;
use std::panic::AssertUnwindSafe;

use axum::{body::Body, http::Request, middleware::Next, response::IntoResponse};
use futures_util::FutureExt;
use serde_json::json;

use crate::http::middleware::Middleware;
use crate::http::response::ApiError;
use crate::observability::{Fields, Logger};

pub fn recovery(logger: Logger) -> Middleware {
    Middleware::from_fn(move |request: Request<Body>, next: Next| {
        let logger = logger.clone();
        async move {
            let method = request.method().to_string();
            let path = request.uri().path().to_string();

            match AssertUnwindSafe(next.run(request)).catch_unwind().await {
                Ok(response) => response,
                Err(payload) => {
                    let mut fields = Fields::new();
                    fields.insert("method".into(), json!(method));
                    fields.insert("path".into(), json!(path));
                    fields.insert("panic".into(), json!(panic_message(payload.as_ref())));
                    logger.with_fields(fields).error("recovered from handler panic");
                    ApiError::internal().into_response()
                }
            }
        }
    })
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
