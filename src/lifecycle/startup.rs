//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the process logger from validated configuration
//! - Route `tracing` output from the transport layer into that logger
//! - Open the browser at the configured URI once the listener is bound
//!
//! # Design Decisions
//! - Fail fast: a logger that cannot reach its file is a startup error
//! - The logger is a value handed to the server, never a global

use std::io;
use std::process::{Command, Stdio};

use tracing::Subscriber;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{AppConfig, Environment};
use crate::observability::{Logger, LoggerError};

/// `tracing` filter used when `RUST_LOG` is unset. Per-request transport
/// events are only bridged in development.
pub fn default_filter(env: Environment) -> &'static str {
    if env.is_production() {
        "reqtrace=info,tower_http=warn,axum=warn"
    } else {
        "reqtrace=debug,tower_http=debug"
    }
}

/// Build the logger with the environment-specific settings applied.
pub fn build_logger(config: &AppConfig) -> Result<Logger, LoggerError> {
    config.logger.for_environment(config.env).builder().build()
}

/// Subscriber writing `tracing` events through `logger` at their own level.
/// Timestamp and level come from the logger's encoder.
pub fn bridge_subscriber(logger: &Logger, filter: EnvFilter) -> impl Subscriber + Send + Sync + 'static {
    tracing_subscriber::registry().with(filter).with(
        tracing_subscriber::fmt::layer()
            .without_time()
            .with_level(false)
            .with_ansi(false)
            .with_writer(logger.clone()),
    )
}

/// Install the bridge as the global subscriber.
///
/// `RUST_LOG` overrides the environment's default filter. Returns false if
/// a subscriber was already installed.
pub fn install_tracing(logger: &Logger, env: Environment) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter(env)));
    bridge_subscriber(logger, filter).try_init().is_ok()
}

/// Open `uri` with the platform opener. Does not wait for it.
pub fn open_browser(uri: &str) -> io::Result<()> {
    let mut command = if cfg!(target_os = "macos") {
        Command::new("open")
    } else if cfg!(target_os = "windows") {
        let mut c = Command::new("cmd");
        c.args(["/C", "start", ""]);
        c
    } else {
        Command::new("xdg-open")
    };

    command
        .arg(uri)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map(|_| ())
}
