//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the service.
//! All types derive Serde traits for deserialization from config files.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::observability::{Encoding, Level, LoggerBuilder, Rotation};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Deployment environment; drives diagnostic endpoints and log verbosity.
    pub env: Environment,

    /// Listener and lifecycle settings.
    pub server: ServerConfig,

    /// Log facade settings.
    pub logger: LoggerConfig,

    /// Request logging middleware settings.
    pub request_log: RequestLogConfig,

    /// Per-client rate limiting.
    pub rate_limit: RateLimitConfig,
}

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    #[serde(alias = "development")]
    Dev,
    #[serde(alias = "prod")]
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Dev => "dev",
            Environment::Production => "production",
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dev" | "development" => Ok(Environment::Dev),
            "prod" | "production" => Ok(Environment::Production),
            other => Err(format!("unknown environment: {}", other)),
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "127.0.0.1:3000").
    pub bind_address: String,

    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,

    /// Upper bound for draining in-flight requests on shutdown.
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:3000".to_string(),
            request_timeout_secs: 30,
            shutdown_timeout_secs: 5,
        }
    }
}

/// Logger configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggerConfig {
    /// Minimum emitted level (debug, info, warn, error, fatal).
    pub level: Level,

    /// Output encoding (console, json).
    pub encoding: Encoding,

    /// chrono strftime layout for the `time` field.
    pub time_layout: Option<String>,

    pub disable_caller: bool,

    /// Suppress stdout output.
    pub disable_console: bool,

    /// Attach a backtrace to error and fatal events.
    pub enable_stack_trace: bool,

    /// File destination.
    pub file: LogFileConfig,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: Level::Debug,
            encoding: Encoding::Json,
            time_layout: None,
            disable_caller: false,
            disable_console: false,
            enable_stack_trace: false,
            file: LogFileConfig::default(),
        }
    }
}

/// Log file destination and rotation policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LogFileConfig {
    /// Write to a file in addition to (or instead of) stdout.
    pub enable: bool,

    /// Log file path.
    pub name: String,

    /// Rotate when the file would exceed this many megabytes.
    pub max_size: u64,

    /// Rotated files to keep (0 = unlimited).
    pub max_backups: usize,

    /// Days to keep rotated files (0 = unlimited).
    pub max_age: u64,

    /// Timestamp backups in local time instead of UTC.
    pub local_time: bool,

    /// Gzip rotated files.
    pub compress: bool,
}

impl Default for LogFileConfig {
    fn default() -> Self {
        Self {
            enable: false,
            name: "log/default.log".to_string(),
            max_size: 10,
            max_backups: 5,
            max_age: 28,
            local_time: false,
            compress: false,
        }
    }
}

impl LogFileConfig {
    pub fn rotation(&self) -> Rotation {
        Rotation {
            max_size_mb: self.max_size,
            max_backups: self.max_backups,
            max_age_days: self.max_age,
            local_time: self.local_time,
            compress: self.compress,
        }
    }
}

impl LoggerConfig {
    /// Effective settings for `env`: production logs at Info or above
    /// and never reports callers.
    pub fn for_environment(&self, env: Environment) -> LoggerConfig {
        let mut config = self.clone();
        if env.is_production() {
            config.level = config.level.max(Level::Info);
            config.disable_caller = true;
        }
        config
    }

    pub fn builder(&self) -> LoggerBuilder {
        let mut builder = LoggerBuilder::new()
            .level(self.level)
            .encoding(self.encoding)
            .disable_caller(self.disable_caller)
            .disable_console(self.disable_console)
            .enable_stack_trace(self.enable_stack_trace);
        if let Some(layout) = &self.time_layout {
            builder = builder.time_layout(layout.clone());
        }
        if self.file.enable {
            builder = builder.rotating_file(PathBuf::from(&self.file.name), self.file.rotation());
        }
        builder
    }
}

/// Request logging middleware configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RequestLogConfig {
    /// Paths never logged (exact match).
    pub skip_paths: Vec<String>,

    /// Path prefixes never logged.
    pub skip_prefixes: Vec<String>,

    /// Largest body, in bytes, copied into the trace in verbose mode.
    pub body_limit: usize,
}

impl Default for RequestLogConfig {
    fn default() -> Self {
        Self {
            skip_paths: Vec::new(),
            skip_prefixes: ["/debug/", "/metrics", "/swagger/", "/health"]
                .into_iter()
                .map(String::from)
                .collect(),
            body_limit: 64 * 1024,
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Sustained requests per second per client IP.
    pub requests_per_second: u32,

    /// Burst capacity.
    pub burst_size: u32,

    /// Key buckets on `X-Forwarded-For` / `X-Real-IP` instead of the socket
    /// peer. Only safe behind a proxy that overwrites those headers.
    pub trust_forwarded_headers: bool,

    /// Buckets untouched for this long are dropped.
    pub idle_timeout_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 100,
            burst_size: 50,
            trust_forwarded_headers: false,
            idle_timeout_secs: 60,
        }
    }
}
