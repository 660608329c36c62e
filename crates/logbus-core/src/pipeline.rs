//! The pipeline facade: start once, hand out producers, shut down.
//!
//! A [`Pipeline`] is an explicitly constructed handle; clone it to share it.
//! Start-up happens at most once. The configuration given to the first
//! successful [`Pipeline::start`] stays in effect until shutdown, and later
//! calls are no-ops.
//!
//! ```no_run
//! use logbus_core::{LogBusConfig, Pipeline};
//!
//! let pipeline = Pipeline::new();
//! pipeline.start(LogBusConfig::new("logs"))?;
//! let _guard = pipeline.shutdown_guard();
//!
//! let log = pipeline.producer("service-A")?;
//! log.info("hello");
//! # Ok::<(), logbus_core::LogBusError>(())
//! ```

use std::collections::HashMap;
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::JoinHandle;

use parking_lot::{Mutex, RwLock};

use crate::backlog::Backlog;
use crate::config::LogBusConfig;
use crate::diagnostics::Diagnostics;
use crate::dispatcher::{DispatchSnapshot, DispatchStats, Dispatcher, FileLevels};
use crate::error::{LogBusError, LogBusResult};
use crate::event::RecordFormat;
use crate::producer::Producer;
use crate::router::StreamRouter;
use crate::sink::{ConsoleSink, RotationPolicy};

#[cfg(unix)]
use crate::relay::RelayServer;

/// Handle to a logging pipeline.
#[derive(Clone, Default)]
pub struct Pipeline {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    running: OnceLock<Running>,
    init: Mutex<()>,
    shut_down: AtomicBool,
    diagnostics: Option<Arc<Diagnostics>>,
}

struct Running {
    config: LogBusConfig,
    backlog: Arc<Backlog>,
    router: Arc<StreamRouter>,
    stats: Arc<DispatchStats>,
    producers: RwLock<HashMap<String, Producer>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    #[cfg(unix)]
    relay: Mutex<Option<RelayServer>>,
}

impl Pipeline {
    /// A pipeline that has not been started yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// A pipeline reporting internal diagnostics to `diagnostics` instead of stderr.
    pub fn with_diagnostics(diagnostics: Arc<Diagnostics>) -> Self {
        Self {
            inner: Arc::new(Inner {
                running: OnceLock::new(),
                init: Mutex::new(()),
                shut_down: AtomicBool::new(false),
                diagnostics: Some(diagnostics),
            }),
        }
    }

    /// Start the pipeline with `config`.
    ///
    /// Returns `Ok(true)` if this call started it and `Ok(false)` if it was
    /// already started (the given config is then ignored). Configuration and
    /// directory errors are returned here; nothing after start-up fails loudly.
    pub fn start(&self, config: LogBusConfig) -> LogBusResult<bool> {
        if self.inner.running.get().is_some() {
            return Ok(false);
        }
        let _init = self.inner.init.lock();
        if self.inner.running.get().is_some() {
            return Ok(false);
        }
        if self.is_shut_down() {
            return Err(LogBusError::Config("pipeline was already shut down".into()));
        }

        config.validate()?;
        fs::create_dir_all(&config.log_dir).map_err(|source| LogBusError::LogDir {
            path: config.log_dir.clone(),
            source,
        })?;

        let diagnostics = self
            .inner
            .diagnostics
            .clone()
            .unwrap_or_else(|| Arc::new(Diagnostics::stderr()));
        let backlog = Arc::new(Backlog::new(
            config.backlog_capacity,
            config.overflow_policy,
            Arc::clone(&diagnostics),
        ));
        let router = Arc::new(StreamRouter::new(
            &config.log_dir,
            RotationPolicy::new(config.rotation_interval, config.max_file_bytes),
            config.retention_count,
        ));

        #[cfg(unix)]
        let relay = match &config.relay_socket {
            Some(path) => Some(RelayServer::bind(
                path,
                Arc::clone(&backlog),
                Arc::clone(&diagnostics),
            )?),
            None => None,
        };

        let mut dispatcher = Dispatcher::new(
            Arc::clone(&backlog),
            Arc::clone(&router),
            RecordFormat::new(config.timestamp_format.clone()),
            FileLevels {
                default: config.file_min_level,
                overrides: config.stream_levels.clone(),
            },
            diagnostics,
        );
        if config.console_enabled {
            dispatcher = dispatcher.with_console(ConsoleSink::stdout(
                config.console_min_level,
                config.console_color,
            ));
        }
        let stats = dispatcher.stats();
        let handle = dispatcher.spawn().map_err(|source| LogBusError::Spawn {
            name: crate::dispatcher::DISPATCHER_THREAD,
            source,
        })?;

        tracing::info!(
            log_dir = %config.log_dir.display(),
            rotation = ?config.rotation_interval,
            max_file_bytes = config.max_file_bytes,
            retention = config.retention_count,
            "logbus pipeline started"
        );

        let running = Running {
            config,
            backlog,
            router,
            stats,
            producers: RwLock::new(HashMap::new()),
            dispatcher: Mutex::new(Some(handle)),
            #[cfg(unix)]
            relay: Mutex::new(relay),
        };
        // Only ever set under the init lock
        let _ = self.inner.running.set(running);
        Ok(true)
    }

    /// Producer for `stream`, starting the pipeline with defaults if needed.
    ///
    /// Producers are cached per stream name.
    pub fn producer(&self, stream: &str) -> LogBusResult<Producer> {
        if stream.is_empty() {
            return Err(LogBusError::InvalidStream(stream.to_string()));
        }
        let running = self.ensure_started()?;

        if let Some(producer) = running.producers.read().get(stream) {
            return Ok(producer.clone());
        }
        let mut producers = running.producers.write();
        let producer = producers.entry(stream.to_string()).or_insert_with(|| {
            Producer::new(
                stream,
                running.config.producer_threshold(stream),
                Arc::clone(&running.backlog),
            )
        });
        Ok(producer.clone())
    }

    /// Stop accepting events, drain the backlog and close every sink.
    ///
    /// Blocks until the dispatcher has written everything queued before the
    /// call. Safe to call more than once.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    /// Guard that shuts the pipeline down when dropped.
    pub fn shutdown_guard(&self) -> ShutdownGuard {
        ShutdownGuard {
            pipeline: self.clone(),
        }
    }

    pub fn is_started(&self) -> bool {
        self.inner.running.get().is_some()
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::Acquire)
    }

    /// Configuration in effect, once started.
    pub fn config(&self) -> Option<&LogBusConfig> {
        self.inner.running.get().map(|running| &running.config)
    }

    /// Dispatcher counters, once started.
    pub fn stats(&self) -> Option<DispatchSnapshot> {
        self.inner
            .running
            .get()
            .map(|running| running.stats.snapshot())
    }

    /// File stems (sanitized stream names) that have an open file.
    pub fn streams(&self) -> Vec<String> {
        self.inner
            .running
            .get()
            .map(|running| running.router.streams())
            .unwrap_or_default()
    }

    /// Events discarded by the backlog (overflow or after shutdown).
    pub fn dropped(&self) -> u64 {
        self.inner
            .running
            .get()
            .map_or(0, |running| running.backlog.dropped())
    }

    fn ensure_started(&self) -> LogBusResult<&Running> {
        if self.inner.running.get().is_none() {
            self.start(LogBusConfig::default())?;
        }
        self.inner
            .running
            .get()
            .ok_or_else(|| LogBusError::Config("pipeline failed to start".into()))
    }
}

impl Inner {
    fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        // Wait out a concurrent start so nothing is left running
        let _init = self.init.lock();
        let Some(running) = self.running.get() else {
            return;
        };

        #[cfg(unix)]
        if let Some(relay) = running.relay.lock().take() {
            relay.stop();
        }

        running.backlog.seal();
        if let Some(handle) = running.dispatcher.lock().take() {
            if handle.join().is_err() {
                eprintln!("logbus: dispatcher thread panicked during shutdown");
            }
        }
        tracing::info!(stats = ?running.stats.snapshot(), "logbus pipeline shut down");
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("started", &self.is_started())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

/// Shuts the pipeline down when dropped; keep it alive in `main`.
#[must_use = "the pipeline shuts down when the guard is dropped"]
pub struct ShutdownGuard {
    pipeline: Pipeline,
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        self.pipeline.shutdown();
    }
}
