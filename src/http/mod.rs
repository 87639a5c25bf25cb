//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, ConnectInfo, TraceLayer)
//!     → middleware/ (recovery → secure → nocache → request_id → logger → ...)
//!     → request.rs (request id, client address)
//!     → application handler (may append sub-operations to the trace)
//!     → response.rs (envelope, business code)
//!     → Send to client
//! ```

pub mod middleware;
pub mod request;
pub mod response;
pub mod server;

pub use middleware::{Middleware, Registry};
pub use request::{RequestId, RequestIdExt, X_REQUEST_ID};
pub use response::{ApiError, ApiResponse, BusinessCode};
pub use server::{HttpServer, OptionsError, ServerError, ServerOptions};
