//! Per-request trace recorder.
//!
//! # State Transitions
//! ```text
//! Created → RequestCaptured → (SubOperationAppended)* → ResponseCaptured → Finalized
//! ```
//!
//! # Design Decisions
//! - Request and response snapshots are write-once (`OnceLock`), read lock-free
//! - One mutex guards the sub-operation list and its sealed flag
//! - Capturing the response seals the list, so no append can land after it
//! - `finalize` hands out the snapshot exactly once

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::{Duration, Instant};

use axum::http::{Request, Response};
use chrono::{DateTime, Utc};
use percent_encoding::percent_decode_str;
use rand::rngs::OsRng;
use rand::RngCore;

use crate::http::request::client_ip;
use crate::http::response::BusinessCode;
use crate::trace::snapshot::{header_snapshot, RequestSnapshot, ResponseSnapshot, SqlRecord, TraceSnapshot};

const ID_BYTES: usize = 10;

/// Error type for trace operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TraceError {
    #[error("failed to generate trace identity: {0}")]
    Identity(String),
    #[error("{0} already captured")]
    AlreadyCaptured(&'static str),
    #[error("operation not allowed in state {0:?}")]
    InvalidState(TraceState),
}

/// Lifecycle position of a trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceState {
    Created,
    RequestCaptured,
    ResponseCaptured,
    Finalized,
}

struct RequestCapture {
    snapshot: RequestSnapshot,
    at: DateTime<Utc>,
    started: Instant,
}

struct ResponseCapture {
    snapshot: ResponseSnapshot,
    at: DateTime<Utc>,
    latency: Duration,
    success: bool,
}

#[derive(Default)]
struct SubOperations {
    records: Vec<SqlRecord>,
    sealed: bool,
}

/// Observability record for one request.
pub struct Trace {
    id: String,
    request: OnceLock<RequestCapture>,
    response: OnceLock<ResponseCapture>,
    sqls: Mutex<SubOperations>,
    finalized: AtomicBool,
}

impl std::fmt::Debug for Trace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Trace")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

impl Trace {
    /// Create a trace, generating a random identity when none is given.
    pub fn create(identity: Option<String>) -> Result<Self, TraceError> {
        let id = match identity.filter(|id| !id.is_empty()) {
            Some(id) => id,
            None => generate_id()?,
        };

        Ok(Self {
            id,
            request: OnceLock::new(),
            response: OnceLock::new(),
            sqls: Mutex::new(SubOperations::default()),
            finalized: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> TraceState {
        if self.finalized.load(Ordering::Acquire) {
            TraceState::Finalized
        } else if self.response.get().is_some() {
            TraceState::ResponseCaptured
        } else if self.request.get().is_some() {
            TraceState::RequestCaptured
        } else {
            TraceState::Created
        }
    }

    /// Record client address, method, decoded URL and headers.
    pub fn capture_request<B>(&self, request: &Request<B>, body: Option<String>) -> Result<(), TraceError> {
        let raw = request
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or_else(|| request.uri().path());

        let capture = RequestCapture {
            snapshot: RequestSnapshot {
                client_ip: client_ip(request),
                method: request.method().to_string(),
                decode_url: decode_url(raw),
                header: header_snapshot(request.headers()),
                body,
            },
            at: Utc::now(),
            started: Instant::now(),
        };

        self.request
            .set(capture)
            .map_err(|_| TraceError::AlreadyCaptured("request"))
    }

    /// Append one sub-operation. Safe for concurrent callers.
    ///
    /// Only accepted between request and response capture.
    pub fn append_sub_operation(&self, record: SqlRecord) -> Result<(), TraceError> {
        let mut ops = self.lock_sqls();
        if self.request.get().is_none() || ops.sealed {
            return Err(TraceError::InvalidState(self.state()));
        }
        ops.records.push(record);
        Ok(())
    }

    /// Record status, business code and headers; compute latency.
    pub fn capture_response<B>(&self, response: &Response<B>, body: Option<String>) -> Result<(), TraceError> {
        let request = self
            .request
            .get()
            .ok_or(TraceError::InvalidState(TraceState::Created))?;

        {
            let mut ops = self.lock_sqls();
            if ops.sealed {
                return Err(TraceError::AlreadyCaptured("response"));
            }
            ops.sealed = true;
        }

        let status = response.status();
        let business = response.extensions().get::<BusinessCode>().cloned().unwrap_or_default();
        let latency = request.started.elapsed();

        let capture = ResponseCapture {
            success: status.as_u16() < 400 && business.code == 0,
            snapshot: ResponseSnapshot {
                header: header_snapshot(response.headers()),
                body,
                business_code: business.code,
                business_code_msg: business.message,
                http_code: status.as_u16(),
                http_code_msg: status.canonical_reason().unwrap_or_default().to_string(),
            },
            at: Utc::now(),
            latency,
        };

        self.response
            .set(capture)
            .map_err(|_| TraceError::AlreadyCaptured("response"))
    }

    /// Freeze the trace. Returns the snapshot on the first call after
    /// response capture, `None` on every other call.
    pub fn finalize(&self) -> Option<TraceSnapshot> {
        let request = self.request.get()?;
        let response = self.response.get()?;
        if self.finalized.swap(true, Ordering::AcqRel) {
            return None;
        }

        Some(TraceSnapshot {
            trace_id: self.id.clone(),
            request: request.snapshot.clone(),
            response: response.snapshot.clone(),
            sqls: self.lock_sqls().records.clone(),
            success: response.success,
            request_at: request.at,
            response_at: response.at,
            latency: response.latency,
        })
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized.load(Ordering::Acquire)
    }

    pub fn request(&self) -> Option<&RequestSnapshot> {
        self.request.get().map(|r| &r.snapshot)
    }

    pub fn response(&self) -> Option<&ResponseSnapshot> {
        self.response.get().map(|r| &r.snapshot)
    }

    pub fn latency(&self) -> Option<Duration> {
        self.response.get().map(|r| r.latency)
    }

    pub fn sub_operations(&self) -> Vec<SqlRecord> {
        self.lock_sqls().records.clone()
    }

    pub fn sub_operation_count(&self) -> usize {
        self.lock_sqls().records.len()
    }

    fn lock_sqls(&self) -> MutexGuard<'_, SubOperations> {
        self.sqls.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Hex-encoded random identity.
fn generate_id() -> Result<String, TraceError> {
    let mut buf = [0u8; ID_BYTES];
    OsRng
        .try_fill_bytes(&mut buf)
        .map_err(|e| TraceError::Identity(e.to_string()))?;
    Ok(hex::encode(buf))
}

/// Percent-decode a request URI, treating `+` as a space.
fn decode_url(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    percent_decode_str(&spaced).decode_utf8_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::StatusCode;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn request() -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/user/%E4%BD%A0?q=a+b%2Bc")
            .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
            .body(Body::empty())
            .unwrap()
    }

    fn response(status: StatusCode) -> Response<Body> {
        Response::builder().status(status).body(Body::empty()).unwrap()
    }

    fn captured() -> Trace {
        let trace = Trace::create(Some("trace-1".into())).unwrap();
        trace.capture_request(&request(), None).unwrap();
        trace
    }

    #[test]
    fn test_generated_identity_is_hex() {
        let trace = Trace::create(None).unwrap();
        assert_eq!(trace.id().len(), ID_BYTES * 2);
        assert!(trace.id().chars().all(|c| c.is_ascii_hexdigit()));

        let empty = Trace::create(Some(String::new())).unwrap();
        assert_eq!(empty.id().len(), ID_BYTES * 2);
    }

    #[test]
    fn test_generated_identities_are_unique() {
        let ids: HashSet<String> = (0..1000)
            .map(|_| Trace::create(None).unwrap().id().to_string())
            .collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_capture_request_snapshot() {
        let trace = captured();
        assert_eq!(trace.id(), "trace-1");
        assert_eq!(trace.state(), TraceState::RequestCaptured);

        let req = trace.request().unwrap();
        assert_eq!(req.method, "POST");
        assert_eq!(req.client_ip, "203.0.113.7");
        assert_eq!(req.decode_url, "/api/user/你?q=a b+c");

        let err = trace.capture_request(&request(), None).unwrap_err();
        assert_eq!(err, TraceError::AlreadyCaptured("request"));
    }

    #[test]
    fn test_append_outside_window_is_rejected() {
        let trace = Trace::create(None).unwrap();
        let err = trace.append_sub_operation(SqlRecord::new("SELECT 1", 1, Duration::ZERO)).unwrap_err();
        assert_eq!(err, TraceError::InvalidState(TraceState::Created));

        trace.capture_request(&request(), None).unwrap();
        trace.append_sub_operation(SqlRecord::new("SELECT 1", 1, Duration::ZERO)).unwrap();
        trace.capture_response(&response(StatusCode::OK), None).unwrap();

        let err = trace.append_sub_operation(SqlRecord::new("SELECT 2", 1, Duration::ZERO)).unwrap_err();
        assert_eq!(err, TraceError::InvalidState(TraceState::ResponseCaptured));
        assert_eq!(trace.sub_operation_count(), 1);
    }

    #[test]
    fn test_concurrent_appends_are_not_lost() {
        const THREADS: usize = 16;
        const PER_THREAD: usize = 625;

        let trace = Arc::new(captured());
        std::thread::scope(|s| {
            for t in 0..THREADS {
                let trace = Arc::clone(&trace);
                s.spawn(move || {
                    for i in 0..PER_THREAD {
                        let sql = format!("SELECT {} FROM t{}", i, t);
                        trace.append_sub_operation(SqlRecord::new(sql, 1, Duration::ZERO)).unwrap();
                    }
                });
            }
        });

        let records = trace.sub_operations();
        assert_eq!(records.len(), THREADS * PER_THREAD);
        let distinct: HashSet<_> = records.iter().map(|r| r.sql.clone()).collect();
        assert_eq!(distinct.len(), THREADS * PER_THREAD);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_appends_from_tasks() {
        let trace = Arc::new(captured());
        let handles: Vec<_> = (0..10_000)
            .map(|i| {
                let trace = Arc::clone(&trace);
                tokio::spawn(async move {
                    trace.append_sub_operation(SqlRecord::new(format!("q{}", i), 0, Duration::ZERO))
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(trace.sub_operation_count(), 10_000);
    }

    #[test]
    fn test_response_requires_request() {
        let trace = Trace::create(None).unwrap();
        let err = trace.capture_response(&response(StatusCode::OK), None).unwrap_err();
        assert_eq!(err, TraceError::InvalidState(TraceState::Created));
    }

    #[test]
    fn test_business_code_and_success() {
        let trace = captured();
        let mut resp = response(StatusCode::NOT_FOUND);
        resp.extensions_mut().insert(BusinessCode::new(200101, "user not found"));
        trace.capture_response(&resp, Some("{}".into())).unwrap();

        let snapshot = trace.finalize().unwrap();
        assert!(!snapshot.success);
        assert_eq!(snapshot.response.business_code, 200101);
        assert_eq!(snapshot.response.business_code_msg, "user not found");
        assert_eq!(snapshot.response.http_code_msg, "Not Found");
        assert_eq!(snapshot.response.body.as_deref(), Some("{}"));
    }

    #[test]
    fn test_finalize_is_idempotent() {
        let trace = captured();
        assert!(trace.finalize().is_none(), "finalize before response capture");
        assert!(!trace.is_finalized());

        trace.append_sub_operation(SqlRecord::new("SELECT 1", 1, Duration::ZERO)).unwrap();
        trace.capture_response(&response(StatusCode::OK), None).unwrap();

        let first = trace.finalize().unwrap();
        let latency = trace.latency().unwrap();
        let response_snapshot = trace.response().unwrap().clone();

        assert!(trace.finalize().is_none());
        assert_eq!(trace.state(), TraceState::Finalized);
        assert_eq!(trace.latency().unwrap(), latency);
        assert_eq!(trace.response().unwrap(), &response_snapshot);
        assert_eq!(first.latency, latency);
        assert!(first.success);
        assert_eq!(first.sqls.len(), 1);

        let err = trace.capture_response(&response(StatusCode::OK), None).unwrap_err();
        assert_eq!(err, TraceError::AlreadyCaptured("response"));
    }

    #[test]
    fn test_latency_is_ordered() {
        let trace = captured();
        std::thread::sleep(Duration::from_millis(5));
        trace.capture_response(&response(StatusCode::OK), None).unwrap();

        let snapshot = trace.finalize().unwrap();
        assert!(snapshot.latency >= Duration::from_millis(5));
        assert!(snapshot.response_at >= snapshot.request_at);

        let value = serde_json::to_value(&snapshot).unwrap();
        assert!(value["latency"].as_u64().unwrap() >= 5_000);
        assert_eq!(value["trace_id"], "trace-1");
    }
}
