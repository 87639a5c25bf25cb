//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum Router: liveness, diagnostic endpoints, application routes
//! - Assemble the middleware registry (defaults, conditional entries, overrides)
//! - Wire transport-level layers (timeout, CORS, tracing)
//! - Bind server to listener with client address info
//! - Drain in-flight requests on shutdown, bounded by a timeout

use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    http::{
        header::{HeaderName, ACCEPT, AUTHORIZATION, CONTENT_TYPE, ORIGIN},
        Method, Uri,
    },
    routing::get,
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::admin::{self, Endpoints, DOCS_PATH, METRICS_PATH, RUNTIME_PATH};
use crate::config::{AppConfig, Environment};
use crate::health;
use crate::http::middleware::{self, Middleware, Registry, RequestLogOptions};
use crate::lifecycle::startup::open_browser;
use crate::observability::{metrics, Logger};
use crate::security::rate_limit::{rate_limit, RateLimiter};

/// Error type for server options.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum OptionsError {
    #[error("browser URI {0:?} is not an absolute http(s) URI")]
    BrowserUri(String),
}

/// Error type for assembling and running the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid server options: {0}")]
    Options(#[from] OptionsError),
}

/// Assembler options, applied in call order on top of environment defaults.
#[derive(Clone, Debug)]
pub struct ServerOptions {
    pub disable_profiling_endpoint: bool,
    pub disable_docs_endpoint: bool,
    pub disable_metrics_endpoint: bool,
    pub enable_cors: bool,
    pub enable_rate_limit: bool,
    pub browser_uri: Option<String>,
    /// Request/response headers and bodies in request log records.
    pub verbose_request_log: bool,
    overrides: Vec<(String, Middleware)>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self::for_environment(Environment::Dev)
    }
}

impl ServerOptions {
    /// Production hides profiling and docs and logs requests tersely;
    /// dev enables both and logs verbosely.
    pub fn for_environment(env: Environment) -> Self {
        let production = env.is_production();
        Self {
            disable_profiling_endpoint: production,
            disable_docs_endpoint: production,
            disable_metrics_endpoint: false,
            enable_cors: false,
            enable_rate_limit: false,
            browser_uri: None,
            verbose_request_log: !production,
            overrides: Vec::new(),
        }
    }

    pub fn disable_profiling_endpoint(mut self) -> Self {
        self.disable_profiling_endpoint = true;
        self
    }

    pub fn disable_docs_endpoint(mut self) -> Self {
        self.disable_docs_endpoint = true;
        self
    }

    pub fn disable_metrics_endpoint(mut self) -> Self {
        self.disable_metrics_endpoint = true;
        self
    }

    pub fn enable_cors(mut self) -> Self {
        self.enable_cors = true;
        self
    }

    pub fn enable_rate_limit(mut self) -> Self {
        self.enable_rate_limit = true;
        self
    }

    /// Open `uri` in a browser once the server is listening.
    pub fn enable_browser_auto_open(mut self, uri: impl Into<String>) -> Self {
        self.browser_uri = Some(uri.into());
        self
    }

    pub fn verbose_request_log(mut self, verbose: bool) -> Self {
        self.verbose_request_log = verbose;
        self
    }

    /// Replace (or add) the registry entry `name`.
    pub fn with_middleware(mut self, name: impl Into<String>, handler: Middleware) -> Self {
        self.overrides.push((name.into(), handler));
        self
    }

    pub fn validate(&self) -> Result<(), OptionsError> {
        if let Some(uri) = &self.browser_uri {
            let ok = uri
                .parse::<Uri>()
                .ok()
                .filter(|u| u.authority().is_some())
                .and_then(|u| u.scheme_str().map(|s| s == "http" || s == "https"))
                .unwrap_or(false);
            if !ok {
                return Err(OptionsError::BrowserUri(uri.clone()));
            }
        }
        Ok(())
    }
}

/// State shared by the built-in endpoints.
#[derive(Clone)]
pub struct AppState {
    pub env: Environment,
    pub bind_address: String,
    pub started: Instant,
    pub prometheus: Option<PrometheusHandle>,
    pub endpoints: Arc<Vec<&'static str>>,
}

impl AppState {
    pub fn new(env: Environment, bind_address: impl Into<String>) -> Self {
        Self {
            env,
            bind_address: bind_address.into(),
            started: Instant::now(),
            prometheus: None,
            endpoints: Arc::new(vec!["/health"]),
        }
    }
}

/// The assembled request pipeline.
pub struct HttpServer {
    config: AppConfig,
    logger: Logger,
    options: ServerOptions,
    routes: Router,
}

impl HttpServer {
    pub fn new(config: AppConfig, logger: Logger, options: ServerOptions) -> Result<Self, ServerError> {
        options.validate()?;
        Ok(Self {
            config,
            logger,
            options,
            routes: Router::new(),
        })
    }

    /// Mount application routes inside the pipeline.
    pub fn routes(mut self, routes: Router) -> Self {
        self.routes = self.routes.merge(routes);
        self
    }

    fn endpoints(&self) -> Endpoints {
        Endpoints {
            runtime: !self.options.disable_profiling_endpoint && !self.config.env.is_production(),
            docs: !self.options.disable_docs_endpoint,
            metrics: !self.options.disable_metrics_endpoint,
        }
    }

    /// Default entries, then `metrics` and `rate_limit` when enabled, then
    /// the caller's overrides.
    pub fn registry(&self) -> Registry {
        let log_options = RequestLogOptions::from_config(&self.config.request_log, self.options.verbose_request_log);
        let mut registry = Registry::with_defaults(&self.logger, log_options);

        if self.endpoints().metrics {
            registry.add(middleware::METRICS, Middleware::from_fn(metrics::track_requests));
        }
        if self.options.enable_rate_limit {
            let limiter = Arc::new(RateLimiter::new(&self.config.rate_limit));
            registry.add(middleware::RATE_LIMIT, rate_limit(limiter, self.logger.clone()));
        }
        for (name, handler) in &self.options.overrides {
            registry.add(name.clone(), handler.clone());
        }
        registry
    }

    /// Build the complete router.
    #[allow(deprecated)]
    pub fn router(&self) -> Router {
        let endpoints = self.endpoints();

        let mut mounted = vec!["/health"];
        if endpoints.runtime {
            mounted.push(RUNTIME_PATH);
        }
        if endpoints.docs {
            mounted.push(DOCS_PATH);
        }
        if endpoints.metrics {
            mounted.push(METRICS_PATH);
        }

        let state = AppState {
            prometheus: if endpoints.metrics { metrics::prometheus_handle() } else { None },
            endpoints: Arc::new(mounted),
            ..AppState::new(self.config.env, self.config.server.bind_address.clone())
        };

        let mut router = Router::new()
            .route("/health", get(health::health))
            .merge(admin::setup_admin_router(endpoints))
            .with_state(state)
            .merge(self.routes.clone())
            .layer(TimeoutLayer::new(Duration::from_secs(self.config.server.request_timeout_secs)));

        if self.options.enable_cors {
            router = router.layer(cors_layer());
        }

        self.registry().install(router).layer(TraceLayer::new_for_http())
    }

    /// Serve until `shutdown` resolves, then drain for at most
    /// `server.shutdown_timeout_secs`.
    pub async fn run<F>(self, listener: TcpListener, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        let drain = Duration::from_secs(self.config.server.shutdown_timeout_secs);
        let registry = self.registry();

        self.logger
            .with_field("address", addr.to_string())
            .with_field("middleware", registry.names())
            .info("HTTP server starting");

        if let Some(uri) = &self.options.browser_uri {
            if let Err(e) = open_browser(uri) {
                self.logger.with_field("uri", uri.as_str()).warn(format_args!("failed to open browser: {}", e));
            }
        }

        let app = self.router().into_make_service_with_connect_info::<SocketAddr>();

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let signal = async move {
            shutdown.await;
            let _ = stop_tx.send(());
        };

        let serve = axum::serve(listener, app).with_graceful_shutdown(signal).into_future();
        tokio::pin!(serve);

        tokio::select! {
            result = &mut serve => {
                result?;
                self.logger.info("HTTP server stopped");
                return Ok(());
            }
            _ = stop_rx => {}
        }

        self.logger
            .with_field("timeout_secs", drain.as_secs())
            .info("draining in-flight requests");
        match tokio::time::timeout(drain, &mut serve).await {
            Ok(result) => {
                result?;
                self.logger.info("HTTP server stopped");
            }
            Err(_) => self.logger.warn("drain timeout elapsed; abandoning in-flight requests"),
        }
        Ok(())
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn options(&self) -> &ServerOptions {
        &self.options
    }
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::HEAD,
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers([
            HeaderName::from_static("x-requested-with"),
            CONTENT_TYPE,
            ORIGIN,
            AUTHORIZATION,
            ACCEPT,
            HeaderName::from_static("client-security-token"),
        ])
}
