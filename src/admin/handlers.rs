use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use serde_json::{json, Value};

use crate::http::server::AppState;

#[derive(Serialize)]
pub struct RuntimeStatus {
    pub version: &'static str,
    pub pid: u32,
    pub uptime_secs: u64,
    pub num_workers: usize,
    pub num_alive_tasks: usize,
}

pub async fn get_runtime(State(state): State<AppState>) -> Json<RuntimeStatus> {
    let metrics = tokio::runtime::Handle::current().metrics();
    Json(RuntimeStatus {
        version: env!("CARGO_PKG_VERSION"),
        pid: std::process::id(),
        uptime_secs: state.started.elapsed().as_secs(),
        num_workers: metrics.num_workers(),
        num_alive_tasks: metrics.num_alive_tasks(),
    })
}

pub async fn get_metrics(State(state): State<AppState>) -> impl IntoResponse {
    match &state.prometheus {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics recorder unavailable".to_string()),
    }
}

pub async fn get_openapi(State(state): State<AppState>) -> Json<Value> {
    Json(openapi_document(&state.endpoints))
}

/// OpenAPI 3 description of the mounted built-in endpoints.
pub fn openapi_document(endpoints: &[&'static str]) -> Value {
    let mut paths = serde_json::Map::new();
    for &path in endpoints {
        let (summary, content_type) = match path {
            "/health" => ("Liveness check", "application/json"),
            "/metrics" => ("Prometheus metrics", "text/plain"),
            "/debug/runtime" => ("Async runtime statistics", "application/json"),
            "/swagger/doc.json" => ("This document", "application/json"),
            _ => ("", "application/json"),
        };
        paths.insert(
            path.to_string(),
            json!({
                "get": {
                    "summary": summary,
                    "responses": {
                        "200": {"description": "OK", "content": {content_type: {}}}
                    }
                }
            }),
        );
    }

    json!({
        "openapi": "3.0.3",
        "info": {"title": env!("CARGO_PKG_NAME"), "version": env!("CARGO_PKG_VERSION")},
        "paths": paths,
    })
}
