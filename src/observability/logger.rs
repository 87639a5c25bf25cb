//! Logger facade.
//!
//! # Responsibilities
//! - Level filtering before any formatting work
//! - Copy-on-branch field overlays (`with_field` / `with_fields`)
//! - Fan-out of one encoded event to every configured target
//! - Byte-sink adapter for components that only know `io::Write`
//!
//! # Design Decisions
//! - One explicitly constructed handle, cloned into every component
//! - Encoders are a closed enum chosen by `LoggerBuilder`, never by string
//! - Handles share the sink through an `Arc`; overlays are never shared mutably

use std::fmt;
use std::io::{self, Write};
use std::panic::Location;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::observability::encoder::{Encoder, Encoding};
use crate::observability::rotation::Rotation;
use crate::observability::sink::{Sink, Target};

/// Field overlay carried by a logger handle.
pub type Fields = serde_json::Map<String, Value>;

/// Default time layout (RFC 3339 with milliseconds).
pub const DEFAULT_TIME_LAYOUT: &str = "%Y-%m-%dT%H:%M:%S%.3f%:z";

/// Event severity, ordered `Debug < Info < Warn < Error < Fatal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    #[default]
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Fatal => "fatal",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown log level: {0}")]
pub struct ParseLevelError(String);

impl FromStr for Level {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(Level::Debug),
            "info" => Ok(Level::Info),
            "warn" | "warning" => Ok(Level::Warn),
            "error" => Ok(Level::Error),
            "fatal" => Ok(Level::Fatal),
            _ => Err(ParseLevelError(s.to_string())),
        }
    }
}

/// A single log emission. Immutable once built.
#[derive(Debug, Clone)]
pub struct LogEvent {
    pub time: DateTime<Local>,
    pub level: Level,
    pub message: String,
    pub fields: Fields,
    pub caller: Option<&'static Location<'static>>,
    pub stack: Option<String>,
}

/// Error type for logger construction and flushing.
#[derive(Debug, thiserror::Error)]
pub enum LoggerError {
    #[error("failed to create log directory {path}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },
    #[error("failed to open log file {path}: {source}")]
    OpenFile { path: PathBuf, source: io::Error },
    #[error("failed to flush log output: {0}")]
    Sync(io::Error),
}

/// File destination, optionally size-rotated.
#[derive(Debug, Clone)]
pub struct FileDestination {
    pub path: PathBuf,
    pub rotation: Option<Rotation>,
}

/// Validated logger configuration, assembled in call order.
pub struct LoggerBuilder {
    level: Level,
    encoding: Encoding,
    time_layout: String,
    disable_caller: bool,
    disable_console: bool,
    enable_stack_trace: bool,
    file: Option<FileDestination>,
    writers: Vec<Box<dyn Write + Send>>,
}

impl Default for LoggerBuilder {
    fn default() -> Self {
        Self {
            level: Level::Debug,
            encoding: Encoding::Console,
            time_layout: DEFAULT_TIME_LAYOUT.to_string(),
            disable_caller: false,
            disable_console: false,
            enable_stack_trace: false,
            file: None,
            writers: Vec::new(),
        }
    }
}

impl LoggerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only events at or above `level` are emitted.
    pub fn level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// chrono strftime layout for the `time` field.
    pub fn time_layout(mut self, layout: impl Into<String>) -> Self {
        self.time_layout = layout.into();
        self
    }

    pub fn disable_caller(mut self, disable: bool) -> Self {
        self.disable_caller = disable;
        self
    }

    pub fn disable_console(mut self, disable: bool) -> Self {
        self.disable_console = disable;
        self
    }

    pub fn enable_stack_trace(mut self, enable: bool) -> Self {
        self.enable_stack_trace = enable;
        self
    }

    /// Append to `path`, creating parent directories.
    pub fn file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(FileDestination { path: path.into(), rotation: None });
        self
    }

    /// Append to `path` with size-based rotation.
    pub fn rotating_file(mut self, path: impl Into<PathBuf>, rotation: Rotation) -> Self {
        self.file = Some(FileDestination { path: path.into(), rotation: Some(rotation) });
        self
    }

    /// Extra raw byte destination. Never receives colour codes.
    pub fn writer<W: Write + Send + 'static>(mut self, writer: W) -> Self {
        self.writers.push(Box::new(writer));
        self
    }

    /// Open every destination and produce the root handle.
    ///
    /// A file destination that cannot be created is an error; there is no
    /// silent fallback to console-only output.
    pub fn build(self) -> Result<Logger, LoggerError> {
        let mut targets = Vec::new();

        if !self.disable_console {
            targets.push(Target::stdout());
        }
        if let Some(file) = &self.file {
            targets.push(Target::file(file)?);
        }
        for writer in self.writers {
            targets.push(Target::writer(writer));
        }

        let encoder = Encoder::new(self.encoding, self.time_layout);

        Ok(Logger {
            core: Arc::new(Core {
                level: self.level,
                encoder,
                sink: Sink::new(targets),
                disable_caller: self.disable_caller,
                enable_stack_trace: self.enable_stack_trace,
            }),
            fields: Arc::new(Fields::new()),
        })
    }
}

struct Core {
    level: Level,
    encoder: Encoder,
    sink: Sink,
    disable_caller: bool,
    enable_stack_trace: bool,
}

/// Cheap-to-clone logging handle bound to one sink.
#[derive(Clone)]
pub struct Logger {
    core: Arc<Core>,
    fields: Arc<Fields>,
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("level", &self.core.level)
            .field("encoding", &self.core.encoder.encoding())
            .field("fields", &self.fields)
            .finish()
    }
}

impl Logger {
    pub fn builder() -> LoggerBuilder {
        LoggerBuilder::new()
    }

    /// Returns true if an event at `level` would be emitted.
    pub fn enabled(&self, level: Level) -> bool {
        level >= self.core.level
    }

    pub fn level(&self) -> Level {
        self.core.level
    }

    pub fn encoding(&self) -> Encoding {
        self.core.encoder.encoding()
    }

    /// New handle with `key` added to the overlay. `self` is unchanged.
    pub fn with_field(&self, key: impl Into<String>, value: impl Into<Value>) -> Logger {
        let mut fields = (*self.fields).clone();
        fields.insert(key.into(), value.into());
        Logger { core: Arc::clone(&self.core), fields: Arc::new(fields) }
    }

    /// New handle with every entry of `kvs` added to the overlay.
    pub fn with_fields(&self, kvs: Fields) -> Logger {
        let mut fields = (*self.fields).clone();
        fields.extend(kvs);
        Logger { core: Arc::clone(&self.core), fields: Arc::new(fields) }
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    #[track_caller]
    pub fn debug(&self, msg: impl fmt::Display) {
        self.emit(Level::Debug, msg, Fields::new(), Some(Location::caller()));
    }

    #[track_caller]
    pub fn info(&self, msg: impl fmt::Display) {
        self.emit(Level::Info, msg, Fields::new(), Some(Location::caller()));
    }

    #[track_caller]
    pub fn warn(&self, msg: impl fmt::Display) {
        self.emit(Level::Warn, msg, Fields::new(), Some(Location::caller()));
    }

    #[track_caller]
    pub fn error(&self, msg: impl fmt::Display) {
        self.emit(Level::Error, msg, Fields::new(), Some(Location::caller()));
    }

    /// Emit at Fatal, flush every target, then terminate the process.
    #[track_caller]
    pub fn fatal(&self, msg: impl fmt::Display) -> ! {
        self.emit(Level::Fatal, msg, Fields::new(), Some(Location::caller()));
        let _ = self.sync();
        std::process::exit(1);
    }

    /// Emit at an arbitrary level. Fatal does not terminate here.
    #[track_caller]
    pub fn log(&self, level: Level, msg: impl fmt::Display) {
        self.emit(level, msg, Fields::new(), Some(Location::caller()));
    }

    /// Emit with per-event fields that are not kept on the handle.
    #[track_caller]
    pub fn log_with(&self, level: Level, msg: impl fmt::Display, fields: Fields) {
        self.emit(level, msg, fields, Some(Location::caller()));
    }

    fn emit(&self, level: Level, msg: impl fmt::Display, extra: Fields, caller: Option<&'static Location<'static>>) {
        if !self.enabled(level) {
            return;
        }

        let mut fields = (*self.fields).clone();
        fields.extend(extra);

        let stack = (self.core.enable_stack_trace && level >= Level::Error)
            .then(|| std::backtrace::Backtrace::force_capture().to_string());

        let event = LogEvent {
            time: Local::now(),
            level,
            message: msg.to_string(),
            fields,
            caller: caller.filter(|_| !self.core.disable_caller),
            stack,
        };

        self.core.sink.write_event(&self.core.encoder, &event);
    }

    /// Flush every target.
    pub fn sync(&self) -> Result<(), LoggerError> {
        self.core.sink.flush().map_err(LoggerError::Sync)
    }

    /// Byte-sink adapter: each complete line becomes one Info event
    /// reporting the call site of `writer()` as its caller.
    #[track_caller]
    pub fn writer(&self) -> LogWriter {
        LogWriter { logger: self.clone(), level: Level::Info, caller: Some(Location::caller()), buf: Vec::new() }
    }
}

impl From<&tracing::Level> for Level {
    fn from(level: &tracing::Level) -> Self {
        match *level {
            tracing::Level::TRACE | tracing::Level::DEBUG => Level::Debug,
            tracing::Level::INFO => Level::Info,
            tracing::Level::WARN => Level::Warn,
            tracing::Level::ERROR => Level::Error,
        }
    }
}

/// Bridge for `tracing_subscriber::fmt`. Lines keep the level of the
/// originating event and carry no caller.
impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for Logger {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriter { logger: self.clone(), level: Level::Info, caller: None, buf: Vec::new() }
    }

    fn make_writer_for(&'a self, meta: &tracing::Metadata<'_>) -> Self::Writer {
        self.make_writer().with_level(meta.level().into())
    }
}

/// `io::Write` adapter returned by [`Logger::writer`].
pub struct LogWriter {
    logger: Logger,
    level: Level,
    caller: Option<&'static Location<'static>>,
    buf: Vec<u8>,
}

impl LogWriter {
    /// Emit lines at `level` instead of Info.
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    fn emit_line(&self, line: &[u8]) {
        let text = String::from_utf8_lossy(line);
        let text = text.trim_end_matches(['\r', '\n']);
        if text.is_empty() {
            return;
        }
        self.logger.emit(self.level, text, Fields::new(), Some(Location::caller()));
    }
}

impl Write for LogWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            self.emit_line(&line);
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.buf.is_empty() {
            let rest = std::mem::take(&mut self.buf);
            self.emit_line(&rest);
        }
        Ok(())
    }
}

impl Drop for LogWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    /// In-memory destination shared between the test and the logger.
    #[derive(Clone, Default)]
    pub(crate) struct Capture(Arc<Mutex<Vec<u8>>>);

    impl Capture {
        pub(crate) fn lines(&self) -> Vec<String> {
            let buf = self.0.lock().unwrap();
            String::from_utf8_lossy(&buf).lines().map(str::to_string).collect()
        }

        pub(crate) fn json_lines(&self) -> Vec<Value> {
            self.lines().iter().map(|l| serde_json::from_str(l).unwrap()).collect()
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

    pub(crate) fn json_logger(level: Level) -> (Logger, Capture) {
        let capture = Capture::default();
        let logger = Logger::builder()
            .level(level)
            .encoding(Encoding::Json)
            .disable_console(true)
            .writer(capture.clone())
            .build()
            .unwrap();
        (logger, capture)
    }

    #[test]
    fn test_level_ordering_and_parse() {
        assert!(Level::Debug < Level::Info);
        assert!(Level::Error < Level::Fatal);
        assert_eq!("WARNING".parse::<Level>().unwrap(), Level::Warn);
        assert!("verbose".parse::<Level>().is_err());
    }

    #[test]
    fn test_events_below_threshold_are_dropped() {
        let (logger, capture) = json_logger(Level::Warn);
        logger.debug("hidden");
        logger.info("hidden");
        logger.warn("shown");
        logger.error(format_args!("shown {}", 2));

        let lines = capture.json_lines();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["level"], "warn");
        assert_eq!(lines[1]["msg"], "shown 2");
    }

    #[test]
    fn test_with_field_does_not_mutate_receiver() {
        let (logger, capture) = json_logger(Level::Debug);
        let child = logger.with_field("k", "v");

        assert_eq!(child.field("k"), Some(&json!("v")));
        assert!(logger.field("k").is_none());

        logger.info("parent");
        child.info("child");
        let lines = capture.json_lines();
        assert!(lines[0].get("k").is_none());
        assert_eq!(lines[1]["k"], "v");
    }

    #[test]
    fn test_with_fields_extends_overlay() {
        let (logger, capture) = json_logger(Level::Debug);
        let mut kvs = Fields::new();
        kvs.insert("para1".into(), json!("value1"));
        kvs.insert("para2".into(), json!(2));

        let child = logger.with_field("trace_id", "abc").with_fields(kvs);
        child.info("hello");

        let line = &capture.json_lines()[0];
        assert_eq!(line["trace_id"], "abc");
        assert_eq!(line["para1"], "value1");
        assert_eq!(line["para2"], 2);
        assert!(logger.fields().is_empty());
    }

    #[test]
    fn test_caller_is_reported_unless_disabled() {
        let (logger, capture) = json_logger(Level::Debug);
        logger.info("with caller");
        let caller = capture.json_lines()[0]["caller"].as_str().unwrap().to_string();
        assert!(caller.starts_with("observability/logger.rs:"), "{caller}");

        let quiet = Capture::default();
        let logger = Logger::builder()
            .encoding(Encoding::Json)
            .disable_console(true)
            .disable_caller(true)
            .writer(quiet.clone())
            .build()
            .unwrap();
        logger.info("no caller");
        assert!(quiet.json_lines()[0].get("caller").is_none());
    }

    #[test]
    fn test_stack_trace_only_for_errors() {
        let capture = Capture::default();
        let logger = Logger::builder()
            .encoding(Encoding::Json)
            .disable_console(true)
            .enable_stack_trace(true)
            .writer(capture.clone())
            .build()
            .unwrap();
        logger.info("plain");
        logger.error("broken");

        let lines = capture.json_lines();
        assert!(lines[0].get("stacktrace").is_none());
        assert!(lines[1]["stacktrace"].is_string());
    }

    #[test]
    fn test_writer_adapter_splits_lines() {
        let (logger, capture) = json_logger(Level::Debug);
        {
            let mut w = logger.writer();
            w.write_all(b"first line\nsecond ").unwrap();
            w.write_all(b"line\ntrailing").unwrap();
        }

        let msgs: Vec<_> = capture.json_lines().iter().map(|l| l["msg"].clone()).collect();
        assert_eq!(msgs, vec![json!("first line"), json!("second line"), json!("trailing")]);
    }

    #[test]
    fn test_writer_level_is_filtered() {
        let (logger, capture) = json_logger(Level::Warn);
        logger.writer().write_all(b"dropped\n").unwrap();
        logger.writer().with_level(Level::Error).write_all(b"kept\n").unwrap();

        let lines = capture.json_lines();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["level"], "error");
        assert!(lines[0]["caller"].as_str().unwrap().starts_with("observability/logger.rs:"));
    }

    #[test]
    fn test_concurrent_handles_share_sink() {
        let (logger, capture) = json_logger(Level::Debug);
        std::thread::scope(|s| {
            for i in 0..8 {
                let l = logger.with_field("worker", i);
                s.spawn(move || {
                    for _ in 0..50 {
                        l.info("tick");
                    }
                });
            }
        });
        assert_eq!(capture.json_lines().len(), 400);
    }

    #[test]
    fn test_file_destination_failure_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();

        let err = Logger::builder()
            .disable_console(true)
            .file(blocker.join("app.log"))
            .build()
            .unwrap_err();
        assert!(matches!(err, LoggerError::CreateDir { .. }));
    }

    #[test]
    fn test_file_destination_receives_events() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/app.log");
        let logger = Logger::builder()
            .encoding(Encoding::Json)
            .disable_console(true)
            .file(&path)
            .build()
            .unwrap();
        logger.with_field("para1", "value1").info("to file");
        logger.sync().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("\"para1\":\"value1\""));
    }
}
