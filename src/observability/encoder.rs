//! Log event encoders.
//!
//! Two backends sit behind one `encode` call: a tab-separated console
//! format and a one-object-per-line JSON format.

use std::io::{self, Write};
use std::path::Path;

use chrono::format::{Item, StrftimeItems};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::observability::logger::{LogEvent, DEFAULT_TIME_LAYOUT};

const GREEN: &str = "\x1b[97;42m";
const WHITE: &str = "\x1b[90;47m";
const YELLOW: &str = "\x1b[90;43m";
const RED: &str = "\x1b[97;41m";
const BLUE: &str = "\x1b[97;44m";
const MAGENTA: &str = "\x1b[97;45m";
const CYAN: &str = "\x1b[97;46m";
const RESET: &str = "\x1b[0m";

/// Output format selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    Console,
    #[default]
    Json,
}

/// Closed set of encoder backends.
#[derive(Debug, Clone)]
pub enum Encoder {
    Console(ConsoleEncoder),
    Json(JsonEncoder),
}

impl Encoder {
    /// Factory for the backend matching `encoding`.
    ///
    /// An unusable time layout falls back to [`DEFAULT_TIME_LAYOUT`].
    pub fn new(encoding: Encoding, time_layout: String) -> Self {
        let time_layout = if is_valid_time_layout(&time_layout) {
            time_layout
        } else {
            DEFAULT_TIME_LAYOUT.to_string()
        };
        match encoding {
            Encoding::Console => Encoder::Console(ConsoleEncoder { time_layout }),
            Encoding::Json => Encoder::Json(JsonEncoder { time_layout }),
        }
    }

    pub fn encoding(&self) -> Encoding {
        match self {
            Encoder::Console(_) => Encoding::Console,
            Encoder::Json(_) => Encoding::Json,
        }
    }

    /// Append one encoded line (with trailing newline) to `buf`.
    ///
    /// `color` is only honoured by the console backend.
    pub fn encode(&self, event: &LogEvent, color: bool, buf: &mut Vec<u8>) -> io::Result<()> {
        match self {
            Encoder::Console(enc) => enc.encode(event, color, buf),
            Encoder::Json(enc) => enc.encode(event, buf),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConsoleEncoder {
    time_layout: String,
}

impl ConsoleEncoder {
    fn encode(&self, event: &LogEvent, color: bool, buf: &mut Vec<u8>) -> io::Result<()> {
        write!(buf, "{}\t{}", event.time.format(&self.time_layout), event.level)?;
        if let Some(caller) = event.caller {
            write!(buf, "\t{}:{}", short_caller(caller.file()), caller.line())?;
        }
        write!(buf, "\t{}", event.message)?;

        if !event.fields.is_empty() {
            buf.push(b'\t');
            for (i, (key, value)) in event.fields.iter().enumerate() {
                if i > 0 {
                    buf.push(b' ');
                }
                let rendered = render_value(value);
                let paint = if color { field_color(key, value) } else { None };
                match paint {
                    Some(c) => write!(buf, "{}={} {} {}", key, c, rendered, RESET)?,
                    None => write!(buf, "{}={}", key, rendered)?,
                }
            }
        }

        if let Some(stack) = &event.stack {
            write!(buf, "\n{}", stack.trim_end())?;
        }
        buf.push(b'\n');
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct JsonEncoder {
    time_layout: String,
}

impl JsonEncoder {
    fn encode(&self, event: &LogEvent, buf: &mut Vec<u8>) -> io::Result<()> {
        let mut obj = serde_json::Map::with_capacity(event.fields.len() + 5);
        for (key, value) in &event.fields {
            obj.insert(key.clone(), value.clone());
        }
        obj.insert("time".into(), Value::String(event.time.format(&self.time_layout).to_string()));
        obj.insert("level".into(), Value::String(event.level.to_string()));
        obj.insert("msg".into(), Value::String(event.message.clone()));
        if let Some(caller) = event.caller {
            obj.insert(
                "caller".into(),
                Value::String(format!("{}:{}", short_caller(caller.file()), caller.line())),
            );
        }
        if let Some(stack) = &event.stack {
            obj.insert("stacktrace".into(), Value::String(stack.clone()));
        }

        serde_json::to_writer(&mut *buf, &obj)?;
        buf.push(b'\n');
        Ok(())
    }
}

/// Returns false if chrono cannot render `layout`.
pub fn is_valid_time_layout(layout: &str) -> bool {
    !layout.is_empty() && !StrftimeItems::new(layout).any(|item| matches!(item, Item::Error))
}

/// `dir/file.rs` from a full source path.
fn short_caller(file: &str) -> String {
    let path = Path::new(file);
    let mut parts: Vec<_> = path.iter().rev().take(2).map(|p| p.to_string_lossy()).collect();
    parts.reverse();
    parts.join("/")
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) if !s.is_empty() && !s.contains(char::is_whitespace) && !s.contains('=') => s.clone(),
        other => other.to_string(),
    }
}

fn field_color(key: &str, value: &Value) -> Option<&'static str> {
    match key {
        "http_code" => value.as_u64().map(status_color),
        "method" => value.as_str().map(method_color),
        _ => None,
    }
}

/// ANSI colour for an HTTP status class.
pub fn status_color(code: u64) -> &'static str {
    match code {
        200..=299 => GREEN,
        300..=399 => WHITE,
        400..=499 => YELLOW,
        _ => RED,
    }
}

/// ANSI colour for an HTTP method.
pub fn method_color(method: &str) -> &'static str {
    match method {
        "GET" => BLUE,
        "POST" => CYAN,
        "PUT" => YELLOW,
        "DELETE" => RED,
        "PATCH" => GREEN,
        "HEAD" => MAGENTA,
        "OPTIONS" => WHITE,
        _ => RESET,
    }
}
