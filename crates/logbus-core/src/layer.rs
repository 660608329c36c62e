//! Tracing layer that feeds `tracing` events into a pipeline.
//!
//! The stream of an event is its `stream` field when present, otherwise its
//! target. Other fields are appended to the message as `key=value`.
//! Events from the pipeline's own targets (`logbus*`) are skipped so the
//! pipeline never logs into itself.

use std::fmt::Write as FmtWrite;

use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

use crate::level::Level;
use crate::pipeline::Pipeline;

/// Field name that selects the stream of an event.
pub const STREAM_FIELD: &str = "stream";

const OWN_TARGET_PREFIX: &str = "logbus";

/// A tracing Layer that emits every event through a [`Pipeline`].
pub struct StreamLayer {
    pipeline: Pipeline,
}

impl StreamLayer {
    pub fn new(pipeline: Pipeline) -> Self {
        Self { pipeline }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }
}

impl<S> Layer<S> for StreamLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let target = metadata.target();
        if target.starts_with(OWN_TARGET_PREFIX) {
            return;
        }

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let stream = visitor.stream.as_deref().unwrap_or(target);
        let Ok(producer) = self.pipeline.producer(stream) else {
            return;
        };
        let level = Level::from(*metadata.level());
        if !producer.enabled(level) {
            return;
        }

        let mut message = visitor.message.unwrap_or_default();
        if let Some(scope) = ctx.event_scope(event) {
            let spans: Vec<_> = scope.from_root().map(|span| span.name()).collect();
            if !spans.is_empty() {
                message = format!("{}: {}", spans.join(" > "), message);
            }
        }
        if !visitor.fields.is_empty() {
            message.push(' ');
            message.push_str(&visitor.fields);
        }

        producer.emit(level, message);
    }
}

/// Collects the message, the stream override and the remaining fields.
#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    stream: Option<String>,
    fields: String,
}

impl FieldVisitor {
    fn push_field(&mut self, name: &str, value: impl std::fmt::Display) {
        if !self.fields.is_empty() {
            self.fields.push(' ');
        }
        let _ = write!(self.fields, "{}={}", name, value);
    }
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let rendered = format!("{:?}", value);
        match field.name() {
            "message" => self.message = Some(rendered),
            STREAM_FIELD => self.stream = Some(rendered.trim_matches('"').to_string()),
            name => self.push_field(name, rendered),
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "message" => self.message = Some(value.to_string()),
            STREAM_FIELD => self.stream = Some(value.to_string()),
            name => self.push_field(name, format_args!("{:?}", value)),
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.push_field(field.name(), value);
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.push_field(field.name(), value);
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.push_field(field.name(), value);
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.push_field(field.name(), value);
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.push_field(field.name(), value);
    }
}
