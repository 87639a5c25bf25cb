//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML, optional)
//!     → loader.rs (parse & deserialize)
//!     → loader.rs (environment variable overrides)
//!     → validation.rs (semantic checks)
//!     → AppConfig (validated, immutable)
//!     → logger builder, server options, middleware settings
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{apply_env_overrides, load_config, parse_config, ConfigError};
pub use schema::{
    AppConfig, Environment, LogFileConfig, LoggerConfig, RateLimitConfig, RequestLogConfig, ServerConfig,
};
pub use validation::{validate_config, ValidationError};
