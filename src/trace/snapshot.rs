//! Serializable trace records.

use std::collections::BTreeMap;
use std::panic::Location;
use std::time::Duration;

use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

/// Header snapshot; multi-valued headers keep every value in order.
pub type HeaderSnapshot = BTreeMap<String, Vec<String>>;

/// Request side of a trace, captured once at entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestSnapshot {
    pub client_ip: String,
    pub method: String,
    pub decode_url: String,
    pub header: HeaderSnapshot,
    pub body: Option<String>,
}

/// Response side of a trace, captured once at exit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseSnapshot {
    pub header: HeaderSnapshot,
    pub body: Option<String>,
    #[serde(skip_serializing_if = "is_zero")]
    pub business_code: i32,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub business_code_msg: String,
    pub http_code: u16,
    pub http_code_msg: String,
}

/// One executed query, appended while the handler runs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SqlRecord {
    pub timestamp: DateTime<Utc>,
    pub stack: String,
    pub sql: String,
    pub rows: i64,
    pub cost_seconds: f64,
}

impl SqlRecord {
    /// Record a statement; `stack` is the calling location.
    #[track_caller]
    pub fn new(sql: impl Into<String>, rows: i64, cost: Duration) -> Self {
        let caller = Location::caller();
        Self {
            timestamp: Utc::now(),
            stack: format!("{}:{}", caller.file(), caller.line()),
            sql: sql.into(),
            rows,
            cost_seconds: cost.as_secs_f64(),
        }
    }
}

/// Finalized view of a trace.
#[derive(Debug, Clone, Serialize)]
pub struct TraceSnapshot {
    pub trace_id: String,
    pub request: RequestSnapshot,
    pub response: ResponseSnapshot,
    pub sqls: Vec<SqlRecord>,
    pub success: bool,
    pub request_at: DateTime<Utc>,
    pub response_at: DateTime<Utc>,
    #[serde(serialize_with = "as_micros")]
    pub latency: Duration,
}

impl TraceSnapshot {
    pub fn display_latency(&self) -> Duration {
        display_latency(self.latency)
    }
}

/// Latency as shown to humans: over a minute, whole seconds only.
pub fn display_latency(latency: Duration) -> Duration {
    if latency > Duration::from_secs(60) {
        Duration::from_secs(latency.as_secs())
    } else {
        latency
    }
}

pub(crate) fn header_snapshot(headers: &HeaderMap) -> HeaderSnapshot {
    let mut snapshot = HeaderSnapshot::new();
    for (name, value) in headers {
        snapshot
            .entry(name.as_str().to_string())
            .or_default()
            .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }
    snapshot
}

fn is_zero(code: &i32) -> bool {
    *code == 0
}

fn as_micros<S: Serializer>(latency: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(latency.as_micros()).unwrap_or(u64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_display_latency_truncates_after_a_minute() {
        let short = Duration::from_millis(59_999);
        assert_eq!(display_latency(short), short);

        let long = Duration::from_millis(61_750);
        assert_eq!(display_latency(long), Duration::from_secs(61));
    }

    #[test]
    fn test_header_snapshot_keeps_repeated_values() {
        let mut headers = HeaderMap::new();
        headers.append("accept", HeaderValue::from_static("text/html"));
        headers.append("accept", HeaderValue::from_static("application/json"));

        let snapshot = header_snapshot(&headers);
        assert_eq!(snapshot["accept"], vec!["text/html", "application/json"]);
    }

    #[test]
    fn test_sql_record_reports_caller() {
        let record = SqlRecord::new("SELECT 1", 1, Duration::from_millis(5));
        assert!(record.stack.contains("snapshot.rs"));
        assert!((record.cost_seconds - 0.005).abs() < f64::EPSILON);
    }

    #[test]
    fn test_business_code_omitted_when_zero() {
        let response = ResponseSnapshot {
            header: HeaderSnapshot::new(),
            body: None,
            business_code: 0,
            business_code_msg: String::new(),
            http_code: 200,
            http_code_msg: "OK".into(),
        };
        let value = serde_json::to_value(&response).unwrap();
        assert!(value.get("business_code").is_none());
        assert_eq!(value["http_code"], 200);
    }
}
