//! Cross-process relay over a Unix socket.
//!
//! Other processes connect with a [`RemoteProducer`] and write one JSON
//! object per line. The [`RelayServer`] decodes each line into an [`Event`]
//! and pushes it into the local backlog, so remote events share the same
//! dispatcher, files and ordering rules as local ones. Events from a single
//! connection keep their order.

use std::fmt;
use std::io::{self, LineWriter, Write};
use std::os::unix::fs::FileTypeExt;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, Local};
use futures::StreamExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinSet;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;

use crate::backlog::Backlog;
use crate::diagnostics::Diagnostics;
use crate::error::{LogBusError, LogBusResult};
use crate::event::{Event, Message, Origin};
use crate::level::Level;

/// Longest accepted line; longer lines are discarded and reported.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Thread name of the relay server.
pub const RELAY_THREAD: &str = "logbus-relay";

/// How long open connections may keep delivering after the relay is stopped.
const DRAIN_GRACE: Duration = Duration::from_millis(250);

/// One event as sent over the socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireEvent {
    /// RFC 3339 timestamp taken by the sender
    pub ts: String,
    pub level: Level,
    pub stream: String,
    pub pid: u32,
    pub thread: String,
    pub msg: String,
}

impl WireEvent {
    /// Stamp a message with the current time and calling thread.
    pub fn now(level: Level, stream: &str, msg: impl Into<String>) -> Self {
        let origin = Origin::current();
        Self {
            ts: Local::now().to_rfc3339(),
            level,
            stream: stream.to_string(),
            pid: origin.pid,
            thread: origin.thread.to_string(),
            msg: msg.into(),
        }
    }

    pub fn decode(line: &str) -> LogBusResult<Self> {
        serde_json::from_str(line).map_err(|e| LogBusError::Wire(e.to_string()))
    }

    pub fn encode(&self) -> LogBusResult<String> {
        serde_json::to_string(self).map_err(|e| LogBusError::Wire(e.to_string()))
    }

    pub fn into_event(self) -> LogBusResult<Event> {
        if self.stream.is_empty() {
            return Err(LogBusError::InvalidStream(self.stream));
        }
        let timestamp = DateTime::parse_from_rfc3339(&self.ts)
            .map_err(|e| LogBusError::Wire(format!("bad timestamp {:?}: {}", self.ts, e)))?
            .with_timezone(&Local);
        Ok(Event::from_parts(
            timestamp,
            self.level,
            Arc::from(self.stream),
            Origin {
                pid: self.pid,
                thread: Arc::from(self.thread),
            },
            Message::Text(self.msg),
        ))
    }
}

/// Accepts events from other processes on a Unix socket.
pub struct RelayServer {
    path: PathBuf,
    cancel: CancellationToken,
    thread: Option<JoinHandle<()>>,
}

impl RelayServer {
    /// Bind `path` and start relaying into `backlog`.
    ///
    /// A stale socket left at `path` by a dead server is replaced. Anything
    /// else there, including a socket with a live listener, fails with
    /// [`LogBusError::RelayBind`] and is left untouched.
    pub fn bind(
        path: impl AsRef<Path>,
        backlog: Arc<Backlog>,
        diagnostics: Arc<Diagnostics>,
    ) -> LogBusResult<Self> {
        let path = path.as_ref().to_path_buf();
        let bind_error = |source: io::Error| LogBusError::RelayBind {
            path: path.clone(),
            source,
        };

        remove_stale_socket(&path).map_err(bind_error)?;

        let cancel = CancellationToken::new();
        let (ready_tx, ready_rx) = mpsc::sync_channel::<io::Result<()>>(1);

        let thread = {
            let path = path.clone();
            let cancel = cancel.clone();
            thread::Builder::new()
                .name(RELAY_THREAD.to_string())
                .spawn(move || {
                    let runtime = match tokio::runtime::Builder::new_current_thread()
                        .enable_all()
                        .build()
                    {
                        Ok(runtime) => runtime,
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    };
                    runtime.block_on(async move {
                        let listener = match UnixListener::bind(&path) {
                            Ok(listener) => listener,
                            Err(e) => {
                                let _ = ready_tx.send(Err(e));
                                return;
                            }
                        };
                        let _ = ready_tx.send(Ok(()));
                        serve(listener, cancel, backlog, diagnostics).await;
                    });
                })
                .map_err(|source| LogBusError::Spawn {
                    name: RELAY_THREAD,
                    source,
                })?
        };

        let ready = ready_rx
            .recv()
            .unwrap_or_else(|_| Err(io::Error::other("relay thread exited during start-up")));
        if let Err(e) = ready {
            let _ = thread.join();
            return Err(bind_error(e));
        }

        tracing::info!(socket = %path.display(), "relay listening");
        Ok(Self {
            path,
            cancel,
            thread: Some(thread),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stop accepting, let open connections drain briefly, remove the socket.
    pub fn stop(mut self) {
        self.stop_inner();
    }

    fn stop_inner(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.cancel.cancel();
        if thread.join().is_err() {
            eprintln!("logbus: relay thread panicked");
        }
        let _ = std::fs::remove_file(&self.path);
        tracing::debug!(socket = %self.path.display(), "relay stopped");
    }
}

/// Remove a socket at `path` that nobody is listening on.
fn remove_stale_socket(path: &Path) -> io::Result<()> {
    let metadata = match std::fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    if !metadata.file_type().is_socket() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            "path exists and is not a socket",
        ));
    }
    if StdUnixStream::connect(path).is_ok() {
        return Err(io::Error::new(
            io::ErrorKind::AddrInUse,
            "another server is listening on this socket",
        ));
    }
    std::fs::remove_file(path)
}

impl Drop for RelayServer {
    fn drop(&mut self) {
        self.stop_inner();
    }
}

impl fmt::Debug for RelayServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayServer")
            .field("path", &self.path)
            .field("running", &self.thread.is_some())
            .finish()
    }
}

async fn serve(
    listener: UnixListener,
    cancel: CancellationToken,
    backlog: Arc<Backlog>,
    diagnostics: Arc<Diagnostics>,
) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    connections.spawn(relay_connection(
                        stream,
                        Arc::clone(&backlog),
                        Arc::clone(&diagnostics),
                    ));
                }
                Err(e) => diagnostics.report(Level::Warn, format!("relay accept failed: {}", e)),
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }
    drop(listener);

    // Clients that already hung up get to finish; the rest are cut off
    let drained = tokio::time::timeout(DRAIN_GRACE, async {
        while connections.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        connections.abort_all();
    }
}

async fn relay_connection(stream: UnixStream, backlog: Arc<Backlog>, diagnostics: Arc<Diagnostics>) {
    let mut lines = FramedRead::new(stream, LinesCodec::new_with_max_length(MAX_LINE_BYTES));
    // FramedRead yields one None after a decode error before it resumes
    let mut resuming = false;
    loop {
        match lines.next().await {
            Some(Ok(line)) => {
                resuming = false;
                if line.trim().is_empty() {
                    continue;
                }
                match WireEvent::decode(&line).and_then(WireEvent::into_event) {
                    Ok(event) => {
                        backlog.push(event);
                    }
                    Err(e) => diagnostics.report(Level::Warn, format!("relay dropped record: {}", e)),
                }
            }
            Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                resuming = true;
                diagnostics.report(
                    Level::Warn,
                    format!("relay dropped record longer than {} bytes", MAX_LINE_BYTES),
                );
            }
            Some(Err(LinesCodecError::Io(e))) => {
                diagnostics.report(Level::Warn, format!("relay connection failed: {}", e));
                break;
            }
            None if resuming => resuming = false,
            None => break,
        }
    }
}

/// Emits events to a [`RelayServer`] in another process.
///
/// Each event is written as one line as soon as it is emitted. If the
/// connection breaks, the failure is reported once on stderr and later
/// events are discarded.
pub struct RemoteProducer {
    stream: String,
    threshold: Level,
    writer: Mutex<LineWriter<StdUnixStream>>,
    failed: AtomicBool,
}

impl RemoteProducer {
    pub fn connect(path: impl AsRef<Path>, stream: &str, threshold: Level) -> LogBusResult<Self> {
        if stream.is_empty() {
            return Err(LogBusError::InvalidStream(stream.to_string()));
        }
        let socket = StdUnixStream::connect(path)?;
        Ok(Self {
            stream: stream.to_string(),
            threshold,
            writer: Mutex::new(LineWriter::new(socket)),
            failed: AtomicBool::new(false),
        })
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    pub fn enabled(&self, level: Level) -> bool {
        level >= self.threshold
    }

    pub fn emit(&self, level: Level, message: impl Into<String>) {
        if !self.enabled(level) || self.failed.load(Ordering::Relaxed) {
            return;
        }
        let line = match WireEvent::now(level, &self.stream, message).encode() {
            Ok(line) => line,
            Err(e) => return self.fail(e),
        };
        let mut writer = self.writer.lock();
        if let Err(e) = writeln!(writer, "{}", line) {
            drop(writer);
            self.fail(e);
        }
    }

    pub fn trace(&self, message: impl Into<String>) {
        self.emit(Level::Trace, message);
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.emit(Level::Debug, message);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(Level::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.emit(Level::Warn, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(Level::Error, message);
    }

    pub fn critical(&self, message: impl Into<String>) {
        self.emit(Level::Critical, message);
    }

    pub fn flush(&self) -> io::Result<()> {
        self.writer.lock().flush()
    }

    fn fail(&self, error: impl fmt::Display) {
        if !self.failed.swap(true, Ordering::Relaxed) {
            eprintln!(
                "logbus: relay producer for {:?} disconnected: {}",
                self.stream, error
            );
        }
    }
}

impl fmt::Debug for RemoteProducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteProducer")
            .field("stream", &self.stream)
            .field("threshold", &self.threshold)
            .finish()
    }
}
