//! Diagnostic endpoints: runtime statistics, API document, metrics.

pub mod handlers;

use axum::{routing::get, Router};

use crate::http::server::AppState;
use self::handlers::*;

pub const RUNTIME_PATH: &str = "/debug/runtime";
pub const DOCS_PATH: &str = "/swagger/doc.json";
pub const METRICS_PATH: &str = "/metrics";

/// Which diagnostic endpoints to mount.
#[derive(Debug, Clone, Copy, Default)]
pub struct Endpoints {
    pub runtime: bool,
    pub docs: bool,
    pub metrics: bool,
}

pub fn setup_admin_router(endpoints: Endpoints) -> Router<AppState> {
    let mut router = Router::new();
    if endpoints.runtime {
        router = router.route(RUNTIME_PATH, get(get_runtime));
    }
    if endpoints.docs {
        router = router.route(DOCS_PATH, get(get_openapi));
    }
    if endpoints.metrics {
        router = router.route(METRICS_PATH, get(get_metrics));
    }
    router
}
