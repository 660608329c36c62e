//! The event envelope and its record rendering.
//!
//! An [`Event`] is built by a producer, handed through the backlog and
//! rendered at most once by the dispatcher. Every sink writes the same
//! rendered line:
//!
//! ```text
//! [2026-10-18 14:30:45] [4242 main] [INFO] service-A: connected to upstream
//! ```

use std::borrow::Cow;
use std::cell::OnceCell;
use std::fmt::{self, Write as FmtWrite};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Local};

use crate::level::Level;

/// Default strftime pattern for record timestamps.
pub const DEFAULT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Identity of the thread (and process) that produced an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub pid: u32,
    pub thread: Arc<str>,
}

impl Origin {
    /// Identity of the calling thread.
    pub fn current() -> Self {
        Self {
            pid: std::process::id(),
            thread: current_thread_label(),
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.pid, self.thread)
    }
}

/// Message payload: either final text or a template with positional arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Text(String),
    /// `{}` takes the next argument, `{N}` the N-th; `{{` and `}}` are literal braces.
    Template { template: String, args: Vec<String> },
}

impl Message {
    /// Render the message text.
    ///
    /// A template whose placeholders do not match its arguments renders as the
    /// literal template followed by the argument list.
    pub fn render(&self) -> Cow<'_, str> {
        match self {
            Message::Text(text) => Cow::Borrowed(text),
            Message::Template { template, args } => match fill_template(template, args) {
                Some(text) => Cow::Owned(text),
                None => Cow::Owned(format!("{} {:?}", template, args)),
            },
        }
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Message::Text(text)
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Message::Text(text.to_string())
    }
}

/// One log occurrence. Immutable once built.
#[derive(Debug, Clone)]
pub struct Event {
    timestamp: DateTime<Local>,
    level: Level,
    stream: Arc<str>,
    origin: Origin,
    message: Message,
    rendered: OnceLock<String>,
}

impl Event {
    /// Create an event stamped with the current time and calling thread.
    pub fn new(level: Level, stream: Arc<str>, message: Message) -> Self {
        Self::from_parts(Local::now(), level, stream, Origin::current(), message)
    }

    /// Create an event from already known parts (e.g. received from another process).
    pub fn from_parts(
        timestamp: DateTime<Local>,
        level: Level,
        stream: Arc<str>,
        origin: Origin,
        message: Message,
    ) -> Self {
        Self {
            timestamp,
            level,
            stream,
            origin,
            message,
            rendered: OnceLock::new(),
        }
    }

    pub fn timestamp(&self) -> DateTime<Local> {
        self.timestamp
    }

    pub fn level(&self) -> Level {
        self.level
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    /// The rendered record line (no trailing newline).
    ///
    /// Computed on first call and cached; later calls return the cached line
    /// even if given a different format.
    pub fn render(&self, format: &RecordFormat) -> &str {
        self.rendered.get_or_init(|| format.render(self))
    }
}

/// Record layout shared by every sink.
#[derive(Debug, Clone)]
pub struct RecordFormat {
    timestamp_format: String,
}

impl RecordFormat {
    pub fn new(timestamp_format: impl Into<String>) -> Self {
        Self {
            timestamp_format: timestamp_format.into(),
        }
    }

    pub fn timestamp_format(&self) -> &str {
        &self.timestamp_format
    }

    /// Whether `pattern` is a strftime pattern chrono can render.
    pub fn is_valid_timestamp_format(pattern: &str) -> bool {
        !StrftimeItems::new(pattern).any(|item| matches!(item, Item::Error))
    }

    /// `[<timestamp>] [<pid> <thread>] [<LEVEL>] <stream>: <message>`
    pub fn render(&self, event: &Event) -> String {
        let message = event.message.render();
        let mut line = String::with_capacity(48 + event.stream.len() + message.len());
        let _ = write!(
            line,
            "[{}] [{}] [{}] {}: {}",
            event.timestamp.format(&self.timestamp_format),
            event.origin,
            event.level,
            event.stream,
            message
        );
        line
    }
}

impl Default for RecordFormat {
    fn default() -> Self {
        Self::new(DEFAULT_TIMESTAMP_FORMAT)
    }
}

fn fill_template(template: &str, args: &[String]) -> Option<String> {
    let mut out = String::with_capacity(template.len() + args.iter().map(String::len).sum::<usize>());
    let mut used = vec![false; args.len()];
    let mut next = 0;
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '{' => {
                let mut spec = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(ch) => spec.push(ch),
                        None => return None,
                    }
                }
                let index = if spec.is_empty() {
                    next += 1;
                    next - 1
                } else {
                    spec.trim().parse::<usize>().ok()?
                };
                out.push_str(args.get(index)?);
                used[index] = true;
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '}' => return None,
            _ => out.push(c),
        }
    }

    used.iter().all(|u| *u).then_some(out)
}

static NEXT_THREAD_NUMBER: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_LABEL: OnceCell<Arc<str>> = const { OnceCell::new() };
}

/// Thread name if set, otherwise `thread-<n>` numbered per process.
fn current_thread_label() -> Arc<str> {
    THREAD_LABEL.with(|label| {
        label
            .get_or_init(|| match std::thread::current().name() {
                Some(name) => Arc::from(name),
                None => Arc::from(format!(
                    "thread-{}",
                    NEXT_THREAD_NUMBER.fetch_add(1, Ordering::Relaxed)
                )),
            })
            .clone()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_event(message: Message) -> Event {
        let timestamp = Local.with_ymd_and_hms(2026, 1, 21, 14, 30, 45).unwrap();
        let origin = Origin {
            pid: 4242,
            thread: Arc::from("worker-1"),
        };
        Event::from_parts(timestamp, Level::Info, Arc::from("service-A"), origin, message)
    }

    #[test]
    fn test_record_layout() {
        let event = fixed_event(Message::from("connected"));
        let line = event.render(&RecordFormat::default());
        assert_eq!(
            line,
            "[2026-01-21 14:30:45] [4242 worker-1] [INFO] service-A: connected"
        );
    }

    #[test]
    fn test_render_is_cached() {
        let event = fixed_event(Message::from("hello"));
        let first = event.render(&RecordFormat::default()).to_string();
        let second = event.render(&RecordFormat::new("%H:%M"));
        assert_eq!(first, second);
    }

    #[test]
    fn test_custom_timestamp_format() {
        let event = fixed_event(Message::from("x"));
        let line = event.render(&RecordFormat::new("%H:%M"));
        assert!(line.starts_with("[14:30] "));
    }

    #[test]
    fn test_template_sequential_and_indexed() {
        let msg = Message::Template {
            template: "{} sent {} bytes".into(),
            args: vec!["peer".into(), "42".into()],
        };
        assert_eq!(msg.render(), "peer sent 42 bytes");

        let msg = Message::Template {
            template: "{1} before {0}".into(),
            args: vec!["a".into(), "b".into()],
        };
        assert_eq!(msg.render(), "b before a");
    }

    #[test]
    fn test_template_escaped_braces() {
        let msg = Message::Template {
            template: "{{literal}} {}".into(),
            args: vec!["x".into()],
        };
        assert_eq!(msg.render(), "{literal} x");
    }

    #[test]
    fn test_template_mismatch_falls_back_to_literal() {
        let missing = Message::Template {
            template: "{} and {}".into(),
            args: vec!["only-one".into()],
        };
        assert_eq!(missing.render(), "{} and {} [\"only-one\"]");

        let extra = Message::Template {
            template: "no placeholders".into(),
            args: vec!["unused".into()],
        };
        assert_eq!(extra.render(), "no placeholders [\"unused\"]");

        let unclosed = Message::Template {
            template: "oops {".into(),
            args: vec![],
        };
        assert_eq!(unclosed.render(), "oops { []");
    }

    #[test]
    fn test_timestamp_format_validation() {
        assert!(RecordFormat::is_valid_timestamp_format(DEFAULT_TIMESTAMP_FORMAT));
        assert!(RecordFormat::is_valid_timestamp_format("%Y%m%dT%H%M%S%.3f"));
        assert!(!RecordFormat::is_valid_timestamp_format("%Q"));
    }

    #[test]
    fn test_origin_uses_thread_name() {
        let origin = std::thread::Builder::new()
            .name("named-producer".into())
            .spawn(Origin::current)
            .unwrap()
            .join()
            .unwrap();
        assert_eq!(&*origin.thread, "named-producer");
        assert_eq!(origin.pid, std::process::id());
    }

    #[test]
    fn test_origin_labels_unnamed_threads() {
        let origin = std::thread::spawn(Origin::current).join().unwrap();
        assert!(origin.thread.starts_with("thread-"));
    }
}
