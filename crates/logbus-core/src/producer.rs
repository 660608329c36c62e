//! Producer handles: the non-blocking emit side of the pipeline.

use std::fmt::{self, Display};
use std::sync::Arc;

use crate::backlog::{Backlog, PushOutcome};
use crate::event::{Event, Message};
use crate::level::Level;

/// Emits events for one stream into the shared backlog.
///
/// Cheap to clone and safe to share between threads. Emitting never touches
/// disk and never reports an error to the caller.
#[derive(Clone)]
pub struct Producer {
    stream: Arc<str>,
    threshold: Level,
    backlog: Arc<Backlog>,
}

impl Producer {
    /// Producer for `stream` that drops events below `threshold`.
    pub fn new(stream: impl Into<Arc<str>>, threshold: Level, backlog: Arc<Backlog>) -> Self {
        Self {
            stream: stream.into(),
            threshold,
            backlog,
        }
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    pub fn threshold(&self) -> Level {
        self.threshold
    }

    /// Whether an event at `level` would be kept.
    #[inline]
    pub fn enabled(&self, level: Level) -> bool {
        level >= self.threshold
    }

    /// Emit a pre-formatted message.
    pub fn emit(&self, level: Level, message: impl Into<String>) {
        if self.enabled(level) {
            self.push(level, Message::Text(message.into()));
        }
    }

    /// Emit a `{}` template with positional arguments.
    ///
    /// Arguments are captured as text now; substitution happens when the
    /// dispatcher renders the record.
    pub fn emit_template(&self, level: Level, template: &str, args: &[&dyn Display]) {
        if self.enabled(level) {
            let args = args.iter().map(|arg| arg.to_string()).collect();
            self.push(
                level,
                Message::Template {
                    template: template.to_string(),
                    args,
                },
            );
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

    fn push(&self, level: Level, message: Message) -> PushOutcome {
        self.backlog
            .push(Event::new(level, Arc::clone(&self.stream), message))
    }
}

impl fmt::Debug for Producer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer")
            .field("stream", &self.stream)
            .field("threshold", &self.threshold)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::Diagnostics;

    fn backlog() -> Arc<Backlog> {
        Arc::new(Backlog::unbounded(Arc::new(Diagnostics::with_writer(
            Box::new(std::io::sink()),
        ))))
    }

    #[test]
    fn test_emit_enqueues_event() {
        let backlog = backlog();
        let producer = Producer::new("svc", Level::Trace, Arc::clone(&backlog));

        producer.info("hello");

        let event = backlog.try_pop().unwrap();
        assert_eq!(event.stream(), "svc");
        assert_eq!(event.level(), Level::Info);
        assert_eq!(event.message().render(), "hello");
        assert_eq!(event.origin().pid, std::process::id());
    }

    #[test]
    fn test_below_threshold_is_noop() {
        let backlog = backlog();
        let producer = Producer::new("svc", Level::Info, Arc::clone(&backlog));

        producer.debug("dropped");
        producer.trace("dropped");
        producer.warn("kept");

        assert_eq!(backlog.len(), 1);
        assert_eq!(backlog.try_pop().unwrap().level(), Level::Warn);
    }

    #[test]
    fn test_template_rendered_lazily() {
        let backlog = backlog();
        let producer = Producer::new("svc", Level::Trace, Arc::clone(&backlog));

        producer.emit_template(Level::Info, "{} of {}", &[&3, &"five"]);

        let event = backlog.try_pop().unwrap();
        assert!(matches!(event.message(), Message::Template { .. }));
        assert_eq!(event.message().render(), "3 of five");
    }

    #[test]
    fn test_level_helpers() {
        let backlog = backlog();
        let producer = Producer::new("svc", Level::Trace, Arc::clone(&backlog));

        producer.trace("t");
        producer.debug("d");
        producer.info("i");
        producer.warn("w");
        producer.error("e");
        producer.critical("c");

        let levels: Vec<_> = std::iter::from_fn(|| backlog.try_pop())
            .map(|e| e.level())
            .collect();
        assert_eq!(levels, Level::ALL.to_vec());
    }

    #[test]
    fn test_emit_after_seal_is_silent() {
        let backlog = backlog();
        let producer = Producer::new("svc", Level::Trace, Arc::clone(&backlog));
        backlog.seal();

        producer.error("too late");

        assert!(backlog.is_empty());
        assert_eq!(backlog.dropped(), 1);
    }
}
