//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Handlers, middleware, startup code
//!     → logger.rs (level filter, field overlay, LogEvent)
//!     → encoder.rs (console text | JSON line)
//!     → sink.rs (stdout, file, custom writers)
//!     → rotation.rs (size-based rollover for file targets)
//!
//! tower-http / axum `tracing` events
//!     → tracing-subscriber fmt layer
//!     → Logger::writer() (one Info event per line)
//!
//! Request counters
//!     → metrics.rs (Prometheus recorder, /metrics rendering)
//! ```
//!
//! # Design Decisions
//! - The logger is constructed once in `main` and cloned, never global
//! - Encoders form a closed set selected at construction
//! - A sink that cannot be opened fails construction

pub mod encoder;
pub mod logger;
pub mod metrics;
pub mod rotation;
pub(crate) mod sink;

pub use encoder::Encoding;
pub use logger::{Fields, Level, LogEvent, LogWriter, Logger, LoggerBuilder, LoggerError};
pub use rotation::Rotation;
