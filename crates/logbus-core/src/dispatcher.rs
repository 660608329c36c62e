//! The dispatcher: the single thread that performs all sink I/O.
//!
//! It drains the backlog in order, renders each event once and writes it to
//! the stream's file sink and to the console. When the backlog runs dry it
//! flushes every sink before blocking, so files are current whenever the
//! pipeline is idle. Errors are reported and never stop the loop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::backlog::Backlog;
use crate::diagnostics::Diagnostics;
use crate::event::{Event, RecordFormat};
use crate::level::Level;
use crate::router::StreamRouter;
use crate::sink::ConsoleSink;

/// Thread name of the dispatcher.
pub const DISPATCHER_THREAD: &str = "logbus-dispatcher";

/// Minimum file level, globally and per stream.
#[derive(Debug, Clone, Default)]
pub struct FileLevels {
    pub default: Level,
    pub overrides: HashMap<String, Level>,
}

impl FileLevels {
    pub fn new(default: Level) -> Self {
        Self {
            default,
            overrides: HashMap::new(),
        }
    }

    pub fn for_stream(&self, stream: &str) -> Level {
        self.overrides.get(stream).copied().unwrap_or(self.default)
    }
}

/// Counters maintained by the dispatcher.
#[derive(Debug, Default)]
pub struct DispatchStats {
    dispatched: AtomicU64,
    file_writes: AtomicU64,
    console_writes: AtomicU64,
    rotations: AtomicU64,
    errors: AtomicU64,
}

/// Point-in-time copy of [`DispatchStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchSnapshot {
    pub dispatched: u64,
    pub file_writes: u64,
    pub console_writes: u64,
    pub rotations: u64,
    pub errors: u64,
}

impl DispatchStats {
    pub fn snapshot(&self) -> DispatchSnapshot {
        DispatchSnapshot {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            file_writes: self.file_writes.load(Ordering::Relaxed),
            console_writes: self.console_writes.load(Ordering::Relaxed),
            rotations: self.rotations.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

pub struct Dispatcher {
    backlog: Arc<Backlog>,
    router: Arc<StreamRouter>,
    console: Option<ConsoleSink>,
    format: RecordFormat,
    levels: FileLevels,
    diagnostics: Arc<Diagnostics>,
    stats: Arc<DispatchStats>,
}

impl Dispatcher {
    pub fn new(
        backlog: Arc<Backlog>,
        router: Arc<StreamRouter>,
        format: RecordFormat,
        levels: FileLevels,
        diagnostics: Arc<Diagnostics>,
    ) -> Self {
        Self {
            backlog,
            router,
            console: None,
            format,
            levels,
            diagnostics,
            stats: Arc::new(DispatchStats::default()),
        }
    }

    /// Mirror events to a console sink.
    pub fn with_console(mut self, console: ConsoleSink) -> Self {
        self.console = Some(console);
        self
    }

    pub fn stats(&self) -> Arc<DispatchStats> {
        Arc::clone(&self.stats)
    }

    /// Run the loop on a dedicated thread.
    pub fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(DISPATCHER_THREAD.to_string())
            .spawn(move || self.run())
    }

    /// Drain the backlog until it is sealed and empty, then close all sinks.
    pub fn run(mut self) {
        tracing::debug!("dispatcher started");
        loop {
            let event = match self.backlog.try_pop() {
                Some(event) => event,
                None => {
                    self.flush();
                    match self.backlog.pop() {
                        Some(event) => event,
                        None => break,
                    }
                }
            };
            self.dispatch(&event);
        }
        self.close();
        tracing::debug!(stats = ?self.stats.snapshot(), "dispatcher stopped");
    }

    /// Write one event to every sink that accepts it.
    pub fn dispatch(&mut self, event: &Event) {
        let line = event.render(&self.format);
        let level = event.level();

        if level >= self.levels.for_stream(event.stream()) {
            match self.router.resolve(event.stream()) {
                Ok(sink) => match sink.lock().write(line) {
                    Ok(rotated) => {
                        DispatchStats::bump(&self.stats.file_writes);
                        if rotated {
                            DispatchStats::bump(&self.stats.rotations);
                        }
                    }
                    Err(e) => self.report(format!(
                        "write to stream {:?} failed: {}",
                        event.stream(),
                        e
                    )),
                },
                Err(e) => self.report(format!(
                    "cannot open file for stream {:?} in {}: {}",
                    event.stream(),
                    self.router.log_dir().display(),
                    e
                )),
            }
        }

        if let Some(console) = self.console.as_mut() {
            if console.accepts(level) {
                match console.write(level, line) {
                    Ok(()) => DispatchStats::bump(&self.stats.console_writes),
                    Err(e) => {
                        let message = format!("console write failed: {}", e);
                        self.report(message);
                    }
                }
            }
        }

        DispatchStats::bump(&self.stats.dispatched);
    }

    fn flush(&mut self) {
        for (stream, e) in self.router.flush_all() {
            self.report(format!("flush of stream {:?} failed: {}", stream, e));
        }
        if let Some(console) = self.console.as_mut() {
            let _ = console.flush();
        }
    }

    fn close(&mut self) {
        for (stream, e) in self.router.close_all() {
            self.report(format!("close of stream {:?} failed: {}", stream, e));
        }
        if let Some(console) = self.console.as_mut() {
            let _ = console.flush();
        }
    }

    fn report(&self, message: String) {
        DispatchStats::bump(&self.stats.errors);
        self.diagnostics.report(Level::Error, message);
    }
}
