//! Request trace subsystem.
//!
//! # Data Flow
//! ```text
//! logger middleware
//!     → Trace::create (propagated request id or random hex)
//!     → capture_request
//!     → Arc<Trace> + trace-scoped Logger inserted into request extensions
//!     → handler code: append_sub_operation (any number of tasks)
//!     → capture_response
//!     → finalize → TraceSnapshot → one structured log record
//! ```
//!
//! # Design Decisions
//! - The trace is shared by `Arc` through request extensions
//! - Tracing is best effort: a trace that cannot be created leaves the
//!   request untraced, never failed

pub mod recorder;
pub mod snapshot;

use std::sync::Arc;

use axum::http::{request::Parts, Request};

use crate::observability::Logger;

pub use recorder::{Trace, TraceError, TraceState};
pub use snapshot::{display_latency, RequestSnapshot, ResponseSnapshot, SqlRecord, TraceSnapshot};

/// Access to the active trace from handler code.
pub trait TraceExt {
    /// The trace attached by the logger middleware, if any.
    fn trace(&self) -> Option<&Arc<Trace>>;

    /// Logger carrying the `trace_id` field for this request.
    fn trace_logger(&self) -> Option<&Logger>;
}

impl<B> TraceExt for Request<B> {
    fn trace(&self) -> Option<&Arc<Trace>> {
        self.extensions().get::<Arc<Trace>>()
    }

    fn trace_logger(&self) -> Option<&Logger> {
        self.extensions().get::<Logger>()
    }
}

impl TraceExt for Parts {
    fn trace(&self) -> Option<&Arc<Trace>> {
        self.extensions.get::<Arc<Trace>>()
    }

    fn trace_logger(&self) -> Option<&Logger> {
        self.extensions.get::<Logger>()
    }
}
