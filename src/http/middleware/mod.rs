//! Middleware registry.
//!
//! # Data Flow
//! ```text
//! Registry::add (defaults, then conditional entries, then overrides)
//!     → Registry::install (layers applied last-to-first)
//!     → request enters the first entry, which delegates to the next
//!     → handler
//!     → response unwinds back out through the same entries in reverse
//! ```
//!
//! # Design Decisions
//! - Entries live in a `Vec`, so installation order is deterministic
//! - A name → index map makes overrides O(1) and keeps positions stable
//! - The first entry is outermost: first on entry, last on exit

pub mod logger;
pub mod recovery;

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use axum::{body::Body, http::Request, middleware::Next, response::Response, Router};
use futures_util::future::BoxFuture;

use crate::observability::Logger;
use crate::security::headers;

pub use logger::{request_logger, RequestLogOptions, SkipFilter};
pub use recovery::recovery;

pub const RECOVERY: &str = "recovery";
pub const SECURE: &str = "secure";
pub const NOCACHE: &str = "nocache";
pub const REQUEST_ID: &str = "request_id";
pub const LOGGER: &str = "logger";
pub const METRICS: &str = "metrics";
pub const RATE_LIMIT: &str = "rate_limit";

type Handler = dyn Fn(Request<Body>, Next) -> BoxFuture<'static, Response> + Send + Sync;

/// One request interceptor. Cheap to clone.
#[derive(Clone)]
pub struct Middleware(Arc<Handler>);

impl Middleware {
    /// Wrap an async function with the `(request, next)` shape.
    pub fn from_fn<F, Fut>(f: F) -> Self
    where
        F: Fn(Request<Body>, Next) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        Self(Arc::new(move |request, next| Box::pin(f(request, next))))
    }

    /// Pass-through interceptor.
    pub fn noop() -> Self {
        Self::from_fn(|request: Request<Body>, next: Next| next.run(request))
    }

    pub fn call(&self, request: Request<Body>, next: Next) -> BoxFuture<'static, Response> {
        (self.0)(request, next)
    }
}

impl fmt::Debug for Middleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Middleware")
    }
}

struct Entry {
    name: String,
    handler: Middleware,
}

/// Ordered, named collection of interceptors.
#[derive(Default)]
pub struct Registry {
    entries: Vec<Entry>,
    index: HashMap<String, usize>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard chain: recovery, secure, nocache, request_id, logger.
    pub fn with_defaults(logger: &Logger, options: RequestLogOptions) -> Self {
        let mut registry = Self::new();
        registry
            .add(RECOVERY, recovery(logger.clone()))
            .add(SECURE, Middleware::from_fn(headers::secure))
            .add(NOCACHE, Middleware::from_fn(headers::nocache))
            .add(REQUEST_ID, Middleware::from_fn(crate::http::request::assign_request_id))
            .add(LOGGER, request_logger(logger.clone(), options));
        registry
    }

    /// Replace the handler of an existing name in place, or append.
    pub fn add(&mut self, name: impl Into<String>, handler: Middleware) -> &mut Self {
        let name = name.into();
        match self.index.get(&name) {
            Some(&pos) => self.entries[pos].handler = handler,
            None => {
                self.index.insert(name.clone(), self.entries.len());
                self.entries.push(Entry { name, handler });
            }
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&Middleware> {
        self.index.get(name).map(|&pos| &self.entries[pos].handler)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    /// Handlers in execution order.
    pub fn all(&self) -> Vec<Middleware> {
        self.entries.iter().map(|e| e.handler.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Wrap every route of `router` in the chain.
    pub fn install<S>(&self, router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        // Router::layer wraps what is already there, so the last layer added
        // ends up outermost.
        self.all().into_iter().rev().fold(router, |router, handler| {
            router.layer(axum::middleware::from_fn(move |request: Request<Body>, next: Next| {
                handler.call(request, next)
            }))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use std::sync::Mutex;
    use tower::ServiceExt;

    type Journal = Arc<Mutex<Vec<String>>>;

    fn tagged(tag: &'static str, journal: &Journal) -> Middleware {
        let journal = Arc::clone(journal);
        Middleware::from_fn(move |request: Request<Body>, next: Next| {
            let journal = Arc::clone(&journal);
            async move {
                journal.lock().unwrap().push(format!("{}-in", tag));
                let response = next.run(request).await;
                journal.lock().unwrap().push(format!("{}-out", tag));
                response
            }
        })
    }

    async fn run(registry: &Registry, journal: &Journal) {
        let handler_journal = Arc::clone(journal);
        let router = Router::new().route(
            "/",
            get(move || async move {
                handler_journal.lock().unwrap().push("handler".to_string());
                "ok"
            }),
        );
        let response = registry
            .install(router)
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
    }

    #[test]
    fn test_override_keeps_position() {
        let journal = Journal::default();
        let mut registry = Registry::new();
        registry
            .add("A", tagged("A", &journal))
            .add("B", tagged("B", &journal))
            .add("C", tagged("C", &journal));

        registry.add("B", tagged("B2", &journal));
        assert_eq!(registry.names(), vec!["A", "B", "C"]);
        assert_eq!(registry.len(), 3);

        registry.add("D", tagged("D", &journal));
        assert_eq!(registry.names(), vec!["A", "B", "C", "D"]);
        assert!(registry.contains("D"));
        assert!(registry.get("E").is_none());
    }

    #[tokio::test]
    async fn test_first_entry_is_outermost() {
        let journal = Journal::default();
        let mut registry = Registry::new();
        registry
            .add("A", tagged("A", &journal))
            .add("B", tagged("B", &journal))
            .add("C", tagged("C", &journal));

        run(&registry, &journal).await;
        assert_eq!(
            *journal.lock().unwrap(),
            vec!["A-in", "B-in", "C-in", "handler", "C-out", "B-out", "A-out"]
        );
    }

    #[tokio::test]
    async fn test_replaced_handler_runs_in_original_slot() {
        let journal = Journal::default();
        let mut registry = Registry::new();
        registry
            .add("A", tagged("A", &journal))
            .add("B", tagged("B", &journal))
            .add("C", tagged("C", &journal));
        registry.add("B", tagged("B2", &journal)).add("D", tagged("D", &journal));

        run(&registry, &journal).await;
        assert_eq!(
            *journal.lock().unwrap(),
            vec!["A-in", "B2-in", "C-in", "D-in", "handler", "D-out", "C-out", "B2-out", "A-out"]
        );
    }

    #[tokio::test]
    async fn test_noop_passes_through() {
        let journal = Journal::default();
        let mut registry = Registry::new();
        registry.add("A", tagged("A", &journal)).add("A", Middleware::noop());

        run(&registry, &journal).await;
        assert_eq!(*journal.lock().unwrap(), vec!["handler"]);
    }

    #[test]
    fn test_default_order() {
        let (logger, _capture) = crate::observability::logger::tests::json_logger(crate::observability::Level::Info);
        let registry = Registry::with_defaults(&logger, RequestLogOptions::default());
        assert_eq!(registry.names(), vec![RECOVERY, SECURE, NOCACHE, REQUEST_ID, LOGGER]);
    }
}
