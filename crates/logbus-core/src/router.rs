//! Stream name → file sink routing.
//!
//! Sinks are created lazily on the first event for a stream and kept for the
//! life of the pipeline. Sinks are keyed by file name, so stream names that
//! sanitize to the same file (`app:db` and `app_db`) share one sink.
//! Creation is serialized per file: concurrent resolves of a new name open
//! exactly one file, while resolves of other names proceed without waiting.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::sink::{sanitize_stream_name, RotatingFileSink, RotationPolicy};

/// A sink shared between the router and the dispatcher.
pub type SharedSink = Arc<Mutex<RotatingFileSink>>;

pub struct StreamRouter {
    log_dir: PathBuf,
    policy: RotationPolicy,
    retention: usize,
    /// Keyed by sanitized file stem
    sinks: RwLock<HashMap<String, SharedSink>>,
    /// Creation locks for files currently being opened
    creating: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    created: AtomicUsize,
}

impl StreamRouter {
    pub fn new(log_dir: impl Into<PathBuf>, policy: RotationPolicy, retention: usize) -> Self {
        Self {
            log_dir: log_dir.into(),
            policy,
            retention,
            sinks: RwLock::new(HashMap::new()),
            creating: Mutex::new(HashMap::new()),
            created: AtomicUsize::new(0),
        }
    }

    /// Sink for `stream`, opening its file on first use.
    pub fn resolve(&self, stream: &str) -> io::Result<SharedSink> {
        let key = sanitize_stream_name(stream);
        if let Some(sink) = self.sinks.read().get(&key) {
            return Ok(Arc::clone(sink));
        }

        let creation_lock = Arc::clone(
            self.creating
                .lock()
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        );
        let _creating = creation_lock.lock();

        // Another resolver may have finished while we waited
        if let Some(sink) = self.sinks.read().get(&key) {
            return Ok(Arc::clone(sink));
        }

        let result = RotatingFileSink::open(&self.log_dir, stream, self.policy, self.retention);
        let outcome = match result {
            Ok(sink) => {
                let sink = Arc::new(Mutex::new(sink));
                self.sinks.write().insert(key.clone(), Arc::clone(&sink));
                self.created.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(stream, file = %key, "opened stream sink");
                Ok(sink)
            }
            Err(e) => Err(e),
        };

        self.creating.lock().remove(&key);
        outcome
    }

    /// Sink for `stream` if it has been created.
    pub fn get(&self, stream: &str) -> Option<SharedSink> {
        self.sinks.read().get(&sanitize_stream_name(stream)).cloned()
    }

    /// File stems (sanitized stream names) with an open sink.
    pub fn streams(&self) -> Vec<String> {
        let mut names: Vec<_> = self.sinks.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.sinks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of sinks ever created.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Flush every sink, collecting failures per stream.
    pub fn flush_all(&self) -> Vec<(String, io::Error)> {
        self.for_each_sink(RotatingFileSink::flush)
    }

    /// Flush and close every sink, collecting failures per stream.
    pub fn close_all(&self) -> Vec<(String, io::Error)> {
        self.for_each_sink(RotatingFileSink::close)
    }

    fn for_each_sink(
        &self,
        op: impl Fn(&mut RotatingFileSink) -> io::Result<()>,
    ) -> Vec<(String, io::Error)> {
        let sinks: Vec<_> = self
            .sinks
            .read()
            .iter()
            .map(|(name, sink)| (name.clone(), Arc::clone(sink)))
            .collect();

        sinks
            .into_iter()
            .filter_map(|(name, sink)| op(&mut sink.lock()).err().map(|e| (name, e)))
            .collect()
    }
}

impl std::fmt::Debug for StreamRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamRouter")
            .field("log_dir", &self.log_dir)
            .field("streams", &self.streams())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::RotationInterval;
    use std::sync::Barrier;
    use std::thread;
    use tempfile::TempDir;

    fn router(dir: &Path) -> StreamRouter {
        StreamRouter::new(dir, RotationPolicy::new(RotationInterval::Never, 0), 5)
    }

    #[test]
    fn test_resolve_caches_sink() {
        let temp = TempDir::new().unwrap();
        let router = router(temp.path());

        let first = router.resolve("svc").unwrap();
        let second = router.resolve("svc").unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(router.created(), 1);
        assert!(temp.path().join("svc.log").exists());
    }

    #[test]
    fn test_distinct_streams_get_distinct_files() {
        let temp = TempDir::new().unwrap();
        let router = router(temp.path());

        router.resolve("alpha").unwrap();
        router.resolve("beta").unwrap();

        assert_eq!(router.streams(), vec!["alpha", "beta"]);
        assert!(temp.path().join("alpha.log").exists());
        assert!(temp.path().join("beta.log").exists());
    }

    #[test]
    fn test_concurrent_first_resolve_creates_one_sink() {
        let temp = TempDir::new().unwrap();
        let router = Arc::new(router(temp.path()));
        let barrier = Arc::new(Barrier::new(16));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let router = Arc::clone(&router);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    router.resolve("new-stream").unwrap()
                })
            })
            .collect();

        let sinks: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(sinks.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(router.created(), 1);
        assert!(router.creating.lock().is_empty());
    }

    #[test]
    fn test_names_sharing_a_file_share_one_sink() {
        let temp = TempDir::new().unwrap();
        let router = StreamRouter::new(
            temp.path(),
            RotationPolicy::new(RotationInterval::Never, 120),
            0,
        );

        let colon = router.resolve("app:db").unwrap();
        let underscore = router.resolve("app_db").unwrap();
        assert!(Arc::ptr_eq(&colon, &underscore));
        assert_eq!(router.created(), 1);
        assert_eq!(router.streams(), vec!["app_db"]);

        // Interleaved writes through both names rotate one file in sequence
        for i in 0..6 {
            colon.lock().write(&format!("a{:02}-xxxxxxxxxxxxxxxxxxxxxxxx", i)).unwrap();
            underscore.lock().write(&format!("b{:02}-xxxxxxxxxxxxxxxxxxxxxxxx", i)).unwrap();
        }
        router.close_all();

        let total: usize = std::fs::read_dir(temp.path())
            .unwrap()
            .map(|entry| {
                std::fs::read_to_string(entry.unwrap().path())
                    .unwrap()
                    .lines()
                    .count()
            })
            .sum();
        assert_eq!(total, 12);
    }

    #[test]
    fn test_failed_creation_is_not_cached() {
        let temp = TempDir::new().unwrap();
        let blocker = temp.path().join("not-a-dir");
        std::fs::write(&blocker, "file in the way").unwrap();

        let router = router(&blocker);
        assert!(router.resolve("svc").is_err());
        assert!(router.is_empty());
        assert!(router.creating.lock().is_empty());
    }

    #[test]
    fn test_flush_and_close_all() {
        let temp = TempDir::new().unwrap();
        let router = router(temp.path());

        router.resolve("svc").unwrap().lock().write("line").unwrap();
        assert!(router.flush_all().is_empty());
        assert_eq!(
            std::fs::read_to_string(temp.path().join("svc.log")).unwrap(),
            "line\n"
        );
        assert!(router.close_all().is_empty());
    }
}
