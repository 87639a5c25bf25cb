//! Request-observability pipeline.
//!
//! Assigns every inbound request a trace identity, records request and
//! response metadata plus any sub-operations (queries) the handler reports,
//! and emits one structured log record per request through an explicitly
//! constructed logger.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ───────────────▶ TraceLayer ─▶ recovery ─▶ secure ─▶ nocache ─▶ request_id ─▶ logger ─▶ [metrics] ─▶ [rate_limit]
//!                                                                                     │
//!                                                                         Trace::create / capture_request
//!                                                                                     │
//!                                                                                     ▼
//!                                                                    /health, /debug/runtime, /swagger/doc.json,
//!                                                                    /metrics, application routes
//!                                                                    (append_sub_operation from any task)
//!                                                                                     │
//!     Client Response                                                                 ▼
//!     ◀─────────────── (same chain, reverse order) ◀── capture_response / finalize ─▶ Logger ─▶ stdout | file
//! ```
//!
//! Cross-cutting: `config` (TOML + env overrides), `lifecycle` (startup,
//! signals, bounded drain), `observability` (logger facade, encoders,
//! rotation, metrics).

// Core subsystems
pub mod config;
pub mod http;
pub mod trace;

// Endpoints
pub mod admin;
pub mod health;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod security;

pub use config::AppConfig;
pub use http::{HttpServer, Middleware, Registry, ServerOptions};
pub use lifecycle::Shutdown;
pub use observability::{Level, Logger};
pub use trace::{SqlRecord, Trace, TraceExt};
