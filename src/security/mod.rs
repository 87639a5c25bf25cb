//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → headers.rs (secure, nocache: response headers on the way out)
//!     → rate_limit.rs (per-IP token bucket, 429 when exhausted)
//!     → Pass to handler
//! ```
//!
//! # Design Decisions
//! - Each concern is a separate registry entry, so it can be replaced
//! - Rate limiting keys on the resolved client address

pub mod headers;
pub mod rate_limit;

pub use rate_limit::RateLimiter;
