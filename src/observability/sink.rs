//! Log output targets.

use std::fs::{self, File, OpenOptions};
use std::io::{self, IsTerminal, Write};
use std::sync::{Mutex, PoisonError};

use crate::observability::encoder::Encoder;
use crate::observability::logger::{FileDestination, LogEvent, LoggerError};
use crate::observability::rotation::RotatingFile;

/// One destination of a [`Sink`].
pub(crate) enum Target {
    Stdout { color: bool },
    Writer(Mutex<Box<dyn Write + Send>>),
}

impl Target {
    pub(crate) fn stdout() -> Self {
        let color = io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none();
        Target::Stdout { color }
    }

    /// Open a file target, creating its parent directory.
    pub(crate) fn file(dest: &FileDestination) -> Result<Self, LoggerError> {
        if let Some(dir) = dest.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|source| LoggerError::CreateDir {
                path: dir.to_path_buf(),
                source,
            })?;
        }

        let open_err = |source| LoggerError::OpenFile { path: dest.path.clone(), source };
        let writer: Box<dyn Write + Send> = match &dest.rotation {
            Some(rotation) => Box::new(RotatingFile::open(&dest.path, rotation.clone()).map_err(open_err)?),
            None => Box::new(append(&dest.path).map_err(open_err)?),
        };
        Ok(Target::Writer(Mutex::new(writer)))
    }

    pub(crate) fn writer(writer: Box<dyn Write + Send>) -> Self {
        Target::Writer(Mutex::new(writer))
    }
}

fn append(path: &std::path::Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// Multiplexes encoded events onto every target.
pub(crate) struct Sink {
    targets: Vec<Target>,
}

impl Sink {
    pub(crate) fn new(targets: Vec<Target>) -> Self {
        Self { targets }
    }

    /// Encode once per colour mode and write to each target.
    ///
    /// Write failures are reported on stderr and otherwise ignored.
    pub(crate) fn write_event(&self, encoder: &Encoder, event: &LogEvent) {
        let mut plain: Option<Vec<u8>> = None;
        let mut colored: Option<Vec<u8>> = None;

        for target in &self.targets {
            let result = match target {
                Target::Stdout { color } => {
                    let slot = if *color { &mut colored } else { &mut plain };
                    match encoded(slot, encoder, event, *color) {
                        Ok(line) => io::stdout().lock().write_all(line),
                        Err(e) => Err(e),
                    }
                }
                Target::Writer(writer) => match encoded(&mut plain, encoder, event, false) {
                    Ok(line) => writer.lock().unwrap_or_else(PoisonError::into_inner).write_all(line),
                    Err(e) => Err(e),
                },
            };

            if let Err(e) = result {
                eprintln!("log write error: {}", e);
            }
        }
    }

    pub(crate) fn flush(&self) -> io::Result<()> {
        for target in &self.targets {
            match target {
                Target::Stdout { .. } => io::stdout().lock().flush()?,
                Target::Writer(writer) => writer.lock().unwrap_or_else(PoisonError::into_inner).flush()?,
            }
        }
        Ok(())
    }
}

fn encoded<'a>(
    slot: &'a mut Option<Vec<u8>>,
    encoder: &Encoder,
    event: &LogEvent,
    color: bool,
) -> io::Result<&'a [u8]> {
    if slot.is_none() {
        let mut buf = Vec::with_capacity(256);
        encoder.encode(event, color, &mut buf)?;
        *slot = Some(buf);
    }
    Ok(slot.as_deref().unwrap_or_default())
}
