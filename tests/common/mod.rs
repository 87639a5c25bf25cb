//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::io::{self, Write};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use reqtrace::config::AppConfig;
use reqtrace::http::{HttpServer, ServerError, ServerOptions};
use reqtrace::observability::Encoding;
use reqtrace::{Level, Logger, Shutdown};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// In-memory log destination shared between the test and the server.
#[derive(Clone, Default)]
pub struct Capture(Arc<Mutex<Vec<u8>>>);

impl Capture {
    pub fn json_lines(&self) -> Vec<Value> {
        let buf = self.0.lock().unwrap();
        String::from_utf8_lossy(&buf)
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    /// Records emitted by the request logging middleware.
    pub fn trace_records(&self) -> Vec<Value> {
        self.json_lines().into_iter().filter(|l| l["msg"] == "trace-log").collect()
    }
}

impl Write for Capture {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub handle: JoinHandle<Result<(), ServerError>>,
    pub logs: Capture,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Trigger shutdown and wait for `run` to return.
    pub async fn stop(self, within: Duration) -> Result<(), ServerError> {
        self.shutdown.trigger();
        tokio::time::timeout(within, self.handle)
            .await
            .expect("server did not stop in time")
            .expect("server task panicked")
    }
}

pub fn test_logger() -> (Logger, Capture) {
    let capture = Capture::default();
    let logger = Logger::builder()
        .level(Level::Debug)
        .encoding(Encoding::Json)
        .disable_console(true)
        .writer(capture.clone())
        .build()
        .unwrap();
    (logger, capture)
}

/// Start the pipeline on an ephemeral port.
pub async fn start_server(mut config: AppConfig, options: ServerOptions, routes: Router) -> TestServer {
    config.server.bind_address = "127.0.0.1:0".to_string();
    let listener = TcpListener::bind(&config.server.bind_address).await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (logger, logs) = test_logger();
    let server = HttpServer::new(config, logger, options).unwrap().routes(routes);

    let shutdown = Shutdown::new();
    let signal = shutdown.signalled();
    let handle = tokio::spawn(server.run(listener, signal));

    TestServer { addr, shutdown, handle, logs }
}
