//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, rate limits > 0)
//! - Check that the logger has somewhere to write
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: AppConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use crate::config::schema::AppConfig;
use crate::observability::encoder::is_valid_time_layout;

/// One semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("server.bind_address {0:?} is not a socket address")]
    BindAddress(String),
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("logger.time_layout {0:?} is not a valid strftime layout")]
    TimeLayout(String),
    #[error("logger.file.name must not be empty when file logging is enabled")]
    EmptyLogFile,
    #[error("logger has no destination: console disabled and file logging off")]
    NoLogDestination,
}

pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.server.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress(config.server.bind_address.clone()));
    }
    if config.server.request_timeout_secs == 0 {
        errors.push(ValidationError::Zero("server.request_timeout_secs"));
    }
    if config.server.shutdown_timeout_secs == 0 {
        errors.push(ValidationError::Zero("server.shutdown_timeout_secs"));
    }

    let logger = &config.logger;
    if let Some(layout) = &logger.time_layout {
        if !is_valid_time_layout(layout) {
            errors.push(ValidationError::TimeLayout(layout.clone()));
        }
    }
    if logger.file.enable && logger.file.name.trim().is_empty() {
        errors.push(ValidationError::EmptyLogFile);
    }
    if logger.disable_console && !logger.file.enable {
        errors.push(ValidationError::NoLogDestination);
    }

    if config.rate_limit.requests_per_second == 0 {
        errors.push(ValidationError::Zero("rate_limit.requests_per_second"));
    }
    if config.rate_limit.burst_size == 0 {
        errors.push(ValidationError::Zero("rate_limit.burst_size"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
