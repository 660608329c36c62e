//! Sinks that record rendered events: one rotating file per stream, plus
//! an optional console mirror.

pub mod console;
pub mod rotating;

pub use console::{ColorChoice, ConsoleSink, ConsoleStyle};
pub use rotating::{sanitize_stream_name, RotatingFileSink, RotationInterval, RotationPolicy};
