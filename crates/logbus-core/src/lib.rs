//! LogBus Core Library
//!
//! Process-wide logging pipeline with one rotating file per stream.
//!
//! ## Overview
//!
//! Any thread may emit events for a named stream. Emitting only queues the
//! event; a single dispatcher thread does all file and console I/O, writing
//! each stream to `<log_dir>/<stream>.log` and rotating the file on a time
//! boundary or a size limit, whichever comes first.
//!
//! ## Core Principles
//!
//! - **Non-blocking producers**: emitting never waits on disk
//! - **One writer per file**: only the dispatcher touches stream files
//! - **Ordered per producer**: events from one thread land in emit order
//! - **Quiet failures**: sink errors go to stderr, never to the caller
//!
//! ## Quick Start
//!
//! ```no_run
//! use logbus_core::{Level, LogBusConfig, Pipeline};
//!
//! fn main() -> Result<(), logbus_core::LogBusError> {
//!     let pipeline = Pipeline::new();
//!     pipeline.start(LogBusConfig::new("logs").with_max_file_bytes(1024 * 1024))?;
//!     let _guard = pipeline.shutdown_guard();
//!
//!     let log = pipeline.producer("service-A")?;
//!     log.info("service started");
//!     log.emit_template(Level::Warn, "queue depth {} over {}", &[&120, &100]);
//!
//!     Ok(())
//! }
//! ```

pub mod backlog;
pub mod config;
pub mod diagnostics;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod layer;
pub mod level;
pub mod pipeline;
pub mod producer;
#[cfg(unix)]
pub mod relay;
pub mod router;
pub mod sink;

// Re-exports
pub use backlog::{Backlog, OverflowPolicy, PushOutcome};
pub use config::LogBusConfig;
pub use diagnostics::Diagnostics;
pub use dispatcher::{DispatchSnapshot, Dispatcher};
pub use error::{LogBusError, LogBusResult};
pub use event::{Event, Message, Origin, RecordFormat};
pub use layer::StreamLayer;
pub use level::Level;
pub use pipeline::{Pipeline, ShutdownGuard};
pub use producer::Producer;
#[cfg(unix)]
pub use relay::{RelayServer, RemoteProducer, WireEvent};
pub use router::StreamRouter;
pub use sink::{ColorChoice, RotatingFileSink, RotationInterval, RotationPolicy};
