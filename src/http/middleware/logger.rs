//! Request logging middleware.
//!
//! # Responsibilities
//! - Drive the trace lifecycle of every non-skipped request
//! - Expose the trace and a `trace_id`-scoped logger to handlers
//! - Emit exactly one structured record per request after the response
//!
//! # Design Decisions
//! - Level follows the status class: Info below 400, Warn for 4xx, Error for 5xx
//! - Bodies are buffered only in verbose mode and only when their length is
//!   known and within the configured limit
//! - A handler panic is still recorded as a 500 before it is passed on to
//!   the recovery entry

use std::collections::HashSet;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use axum::{
    body::{Body, Bytes, HttpBody},
    http::{header::CONTENT_LENGTH, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use futures_util::{stream, FutureExt, StreamExt};
use serde_json::{json, Value};

use crate::config::RequestLogConfig;
use crate::http::middleware::{recovery::panic_message, Middleware};
use crate::http::request::RequestIdExt;
use crate::http::response::ApiError;
use crate::observability::{Fields, Level, Logger};
use crate::trace::{Trace, TraceSnapshot};

/// Predicate deciding that a request is not logged.
pub type SkipFilter = Arc<dyn Fn(&Request<Body>) -> bool + Send + Sync>;

const DEFAULT_BODY_LIMIT: usize = 64 * 1024;

/// Behaviour of the `logger` registry entry.
#[derive(Clone)]
pub struct RequestLogOptions {
    pub skip_paths: HashSet<String>,
    pub skip_prefixes: Vec<String>,
    pub filter: Option<SkipFilter>,
    pub verbose: bool,
    pub body_limit: usize,
}

impl Default for RequestLogOptions {
    fn default() -> Self {
        Self {
            skip_paths: HashSet::new(),
            skip_prefixes: Vec::new(),
            filter: None,
            verbose: false,
            body_limit: DEFAULT_BODY_LIMIT,
        }
    }
}

impl fmt::Debug for RequestLogOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestLogOptions")
            .field("skip_paths", &self.skip_paths)
            .field("skip_prefixes", &self.skip_prefixes)
            .field("filter", &self.filter.is_some())
            .field("verbose", &self.verbose)
            .field("body_limit", &self.body_limit)
            .finish()
    }
}

impl RequestLogOptions {
    pub fn from_config(config: &RequestLogConfig, verbose: bool) -> Self {
        Self {
            skip_paths: config.skip_paths.iter().cloned().collect(),
            skip_prefixes: config.skip_prefixes.clone(),
            filter: None,
            verbose,
            body_limit: config.body_limit,
        }
    }

    /// Skip requests for which `filter` returns true.
    pub fn with_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&Request<Body>) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }

    pub fn should_skip(&self, request: &Request<Body>) -> bool {
        let path = request.uri().path();
        self.skip_paths.contains(path)
            || self.skip_prefixes.iter().any(|p| path.starts_with(p.as_str()))
            || self.filter.as_ref().is_some_and(|f| f(request))
    }
}

pub fn request_logger(logger: Logger, options: RequestLogOptions) -> Middleware {
    let options = Arc::new(options);
    Middleware::from_fn(move |request: Request<Body>, next: Next| {
        log_request(logger.clone(), Arc::clone(&options), request, next)
    })
}

async fn log_request(logger: Logger, options: Arc<RequestLogOptions>, request: Request<Body>, next: Next) -> Response {
    if options.should_skip(&request) {
        return next.run(request).await;
    }

    let identity = request.request_id().map(|id| id.to_string());
    let trace = match Trace::create(identity) {
        Ok(trace) => Arc::new(trace),
        Err(e) => {
            logger.warn(format_args!("request not traced: {}", e));
            return next.run(request).await;
        }
    };

    let (mut request, body) = if options.verbose {
        buffer_request(request, options.body_limit, &logger).await
    } else {
        (request, None)
    };

    if let Err(e) = trace.capture_request(&request, body) {
        logger.warn(format_args!("request capture failed: {}", e));
    }
    request.extensions_mut().insert(Arc::clone(&trace));
    request.extensions_mut().insert(logger.with_field("trace_id", trace.id()));

    let (response, panic) = match AssertUnwindSafe(next.run(request)).catch_unwind().await {
        Ok(response) => (response, None),
        Err(payload) => (ApiError::internal().with_trace_id(trace.id()).into_response(), Some(payload)),
    };

    let (response, body) = if options.verbose {
        buffer_response(response, options.body_limit, &logger).await
    } else {
        (response, None)
    };

    if let Err(e) = trace.capture_response(&response, body) {
        logger.warn(format_args!("response capture failed: {}", e));
    }
    if let Some(snapshot) = trace.finalize() {
        let mut fields = record_fields(&snapshot, options.verbose);
        if let Some(payload) = &panic {
            fields.insert("panic".into(), json!(panic_message(payload.as_ref())));
        }
        logger.log_with(level_for(snapshot.response.http_code), "trace-log", fields);
    }

    match panic {
        Some(payload) => std::panic::resume_unwind(payload),
        None => response,
    }
}

fn level_for(status: u16) -> Level {
    match status {
        500.. => Level::Error,
        400..=499 => Level::Warn,
        _ => Level::Info,
    }
}

fn record_fields(snapshot: &TraceSnapshot, verbose: bool) -> Fields {
    let req = &snapshot.request;
    let resp = &snapshot.response;

    let mut fields = Fields::new();
    fields.insert("trace_id".into(), json!(snapshot.trace_id));
    fields.insert("method".into(), json!(req.method));
    fields.insert("path".into(), json!(req.decode_url));
    fields.insert("client_ip".into(), json!(req.client_ip));
    fields.insert("http_code".into(), json!(resp.http_code));
    fields.insert("business_code".into(), json!(resp.business_code));
    fields.insert("business_code_msg".into(), json!(resp.business_code_msg));
    fields.insert("http_code_msg".into(), json!(resp.http_code_msg));
    fields.insert("request_at".into(), json!(snapshot.request_at.to_rfc3339()));
    fields.insert("response_at".into(), json!(snapshot.response_at.to_rfc3339()));
    fields.insert("costs".into(), json!(snapshot.display_latency().as_micros() as u64));
    fields.insert(
        "sql".into(),
        Value::Array(snapshot.sqls.iter().map(|s| json!(s.sql)).collect()),
    );

    if verbose {
        fields.insert("request_header".into(), json!(req.header));
        fields.insert("request_body".into(), json!(req.body));
        fields.insert("response_header".into(), json!(resp.header));
        fields.insert("response_body".into(), json!(resp.body));
        fields.insert("sqls".into(), json!(snapshot.sqls));
        fields.insert("success".into(), json!(snapshot.success));
    }
    fields
}

async fn buffer_request(request: Request<Body>, limit: usize, logger: &Logger) -> (Request<Body>, Option<String>) {
    let length = request
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());

    match length {
        Some(len) if len > 0 && len <= limit => {
            let (parts, body) = request.into_parts();
            let (body, text) = capture_body(body, limit, logger, "request").await;
            (Request::from_parts(parts, body), text)
        }
        _ => (request, None),
    }
}

async fn buffer_response(response: Response, limit: usize, logger: &Logger) -> (Response, Option<String>) {
    let fits = response
        .body()
        .size_hint()
        .exact()
        .is_some_and(|len| len <= limit as u64);
    if !fits {
        return (response, None);
    }

    let (parts, body) = response.into_parts();
    let (body, text) = capture_body(body, limit, logger, "response").await;
    (Response::from_parts(parts, body), text)
}

/// Read up to `limit` bytes of `body` for the record.
///
/// The returned body replays every chunk already read followed by whatever
/// the original stream still yields, a read error included, so the
/// consumer sees the same body it would have seen without capture.
async fn capture_body(body: Body, limit: usize, logger: &Logger, side: &'static str) -> (Body, Option<String>) {
    let mut data = body.into_data_stream();
    let mut chunks: Vec<Bytes> = Vec::new();
    let mut read = 0;

    while let Some(frame) = data.next().await {
        match frame {
            Ok(chunk) => {
                read += chunk.len();
                chunks.push(chunk);
                if read > limit {
                    let replay = stream::iter(chunks.into_iter().map(Ok)).chain(data);
                    return (Body::from_stream(replay), None);
                }
            }
            Err(e) => {
                logger
                    .with_field("side", side)
                    .warn(format_args!("body not captured: {}", e));
                let failed = stream::once(async move { Err::<Bytes, axum::Error>(e) });
                let replay = stream::iter(chunks.into_iter().map(Ok)).chain(failed);
                return (Body::from_stream(replay), None);
            }
        }
    }

    let bytes = chunks.concat();
    let text = String::from_utf8_lossy(&bytes).into_owned();
    (Body::from(bytes), Some(text))
}
