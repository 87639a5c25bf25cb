//! Liveness endpoint.
//!
//! # Data Flow
//! ```text
//! GET /health
//!     → Host header (or the configured bind address)
//!     → HealthStatus {timestamp, environment, host, status: "ok"}
//! ```
//!
//! # Design Decisions
//! - Always mounted, whatever the server options say
//! - No dependency checks: answering at all is the signal

use axum::{
    extract::State,
    http::{header::HOST, HeaderMap},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::http::server::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthStatus {
    /// Unix seconds at which the check was answered.
    pub timestamp: i64,
    pub environment: String,
    pub host: String,
    pub status: String,
}

pub async fn health(State(state): State<AppState>, headers: HeaderMap) -> Json<HealthStatus> {
    let host = headers
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| state.bind_address.clone());

    Json(HealthStatus {
        timestamp: chrono::Utc::now().timestamp(),
        environment: state.env.to_string(),
        host,
        status: "ok".to_string(),
    })
}
