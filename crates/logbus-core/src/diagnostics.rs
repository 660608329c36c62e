//! Internal diagnostic channel.
//!
//! Failures inside the pipeline (a sink that cannot be opened, a dropped
//! event, a malformed relay line) are written here rather than through the
//! pipeline, so a broken sink can never feed back into itself.

use std::fmt;
use std::io::{self, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::event::{Event, Message, RecordFormat};
use crate::level::Level;

/// Stream name used for the pipeline's own diagnostics.
pub const DIAGNOSTIC_STREAM: &str = "logbus";

/// Writes internal diagnostics to stderr (or a supplied writer).
pub struct Diagnostics {
    out: Mutex<Box<dyn Write + Send>>,
    format: RecordFormat,
    reported: AtomicU64,
}

impl Diagnostics {
    pub fn stderr() -> Self {
        Self::with_writer(Box::new(io::stderr()))
    }

    pub fn with_writer(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
            format: RecordFormat::default(),
            reported: AtomicU64::new(0),
        }
    }

    /// Report one diagnostic. Never fails.
    pub fn report(&self, level: Level, message: impl fmt::Display) {
        self.reported.fetch_add(1, Ordering::Relaxed);
        let event = Event::new(
            level,
            Arc::from(DIAGNOSTIC_STREAM),
            Message::Text(message.to_string()),
        );
        let mut out = self.out.lock();
        let _ = writeln!(out, "{}", event.render(&self.format));
        let _ = out.flush();
    }

    /// Number of diagnostics reported so far.
    pub fn reported(&self) -> u64 {
        self.reported.load(Ordering::Relaxed)
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::stderr()
    }
}

impl fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Diagnostics")
            .field("reported", &self.reported())
            .finish()
    }
}

/// Shared in-memory writer, handy for capturing diagnostics and console output.
#[derive(Clone, Default)]
pub struct CaptureBuffer(Arc<Mutex<Vec<u8>>>);

impl CaptureBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far, lossily decoded.
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl Write for CaptureBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
