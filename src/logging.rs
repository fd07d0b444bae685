//! Tracing setup
//!
//! Everything goes to stdout (the container log) and, without colors, to the
//! driver log in the output folder.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;

use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Appends to a file, reopening it for every event.
///
/// The output folder is reset after startup, so holding a descriptor would
/// keep writing into a deleted file.
#[derive(Clone, Debug)]
pub struct AppendFile {
    path: PathBuf,
}

impl AppendFile {
    /// Writer appending to `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

/// Writer for one event; a missing file swallows the event
pub enum AppendWriter {
    /// Open log file
    File(File),
    /// The file could not be opened
    Sink(io::Sink),
}

impl Write for AppendWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::File(f) => f.write(buf),
            Self::Sink(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::File(f) => f.flush(),
            Self::Sink(s) => s.flush(),
        }
    }
}

impl<'a> MakeWriter<'a> for AppendFile {
    type Writer = AppendWriter;

    fn make_writer(&'a self) -> Self::Writer {
        match OpenOptions::new().create(true).append(true).open(&self.path) {
            Ok(file) => AppendWriter::File(file),
            Err(_) => AppendWriter::Sink(io::sink()),
        }
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` overrides the default `info` filter. When `log_file` is set,
/// events are appended there as well.
pub fn init(log_file: Option<PathBuf>) {
    let file_layer = log_file.map(|path| {
        tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_target(false)
            .with_writer(AppendFile::new(path))
    });

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(file_layer)
        .init();
}
