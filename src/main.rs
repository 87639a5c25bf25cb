use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tokio::net::TcpListener;

use reqtrace::config::{load_config, AppConfig};
use reqtrace::http::{HttpServer, ServerOptions};
use reqtrace::lifecycle::{signals::wait_for_signal, startup};

#[derive(Parser)]
#[command(name = "reqtrace")]
#[command(about = "Request-observability HTTP pipeline", long_about = None)]
struct Cli {
    /// TOML configuration file; defaults apply when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server (default)
    Serve,
    /// Validate the configuration and print the effective settings
    CheckConfig,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::CheckConfig => match toml::to_string_pretty(&config) {
            Ok(text) => {
                println!("{}", text);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("failed to render configuration: {}", e);
                ExitCode::FAILURE
            }
        },
        Commands::Serve => serve(config),
    }
}

#[tokio::main]
async fn serve(config: AppConfig) -> ExitCode {
    let logger = match startup::build_logger(&config) {
        Ok(logger) => logger,
        Err(e) => {
            eprintln!("failed to initialize logger: {}", e);
            return ExitCode::FAILURE;
        }
    };
    startup::install_tracing(&logger, config.env);

    logger
        .with_field("env", config.env.to_string())
        .with_field("bind_address", config.server.bind_address.clone())
        .info(format_args!("{} v{} starting", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")));

    let listener = match TcpListener::bind(&config.server.bind_address).await {
        Ok(listener) => listener,
        Err(e) => {
            logger.error(format_args!("failed to bind {}: {}", config.server.bind_address, e));
            let _ = logger.sync();
            return ExitCode::FAILURE;
        }
    };

    let options = ServerOptions::for_environment(config.env);
    let result = match HttpServer::new(config, logger.clone(), options) {
        Ok(server) => server.run(listener, wait_for_signal()).await,
        Err(e) => Err(e),
    };

    let code = match result {
        Ok(()) => {
            logger.info("Shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            logger.error(format_args!("server error: {}", e));
            ExitCode::FAILURE
        }
    };

    if let Err(e) = logger.sync() {
        eprintln!("{}", e);
    }
    code
}
