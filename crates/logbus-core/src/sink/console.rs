//! Console sink: every event at or above a threshold goes to stdout,
//! regardless of stream.

use std::io::{self, IsTerminal, Write};

use serde::{Deserialize, Serialize};

use crate::level::Level;

const RESET: &str = "\x1b[0m";

/// Whether console output should be colored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorChoice {
    /// Color only when stdout is a capable terminal
    #[default]
    Auto,
    Always,
    Never,
}

/// Output style, fixed when the sink is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleStyle {
    Plain,
    Ansi,
}

impl ConsoleStyle {
    /// Resolve a [`ColorChoice`] against the current environment.
    pub fn detect(choice: ColorChoice) -> Self {
        match choice {
            ColorChoice::Always => ConsoleStyle::Ansi,
            ColorChoice::Never => ConsoleStyle::Plain,
            ColorChoice::Auto => {
                let no_color = std::env::var_os("NO_COLOR").is_some_and(|v| !v.is_empty());
                let dumb = std::env::var("TERM").is_ok_and(|term| term == "dumb");
                if io::stdout().is_terminal() && !no_color && !dumb {
                    ConsoleStyle::Ansi
                } else {
                    ConsoleStyle::Plain
                }
            }
        }
    }
}

/// ANSI prefix used for each level.
fn level_color(level: Level) -> &'static str {
    match level {
        Level::Trace => "\x1b[2;37m",
        Level::Debug => "\x1b[37m",
        Level::Info => "\x1b[34m",
        Level::Warn => "\x1b[33m",
        Level::Error => "\x1b[31m",
        Level::Critical => "\x1b[37;41m",
    }
}

/// Synchronous console writer.
pub struct ConsoleSink {
    min_level: Level,
    style: ConsoleStyle,
    out: Box<dyn Write + Send>,
}

impl ConsoleSink {
    /// Console sink on stdout.
    pub fn stdout(min_level: Level, choice: ColorChoice) -> Self {
        Self::with_writer(min_level, ConsoleStyle::detect(choice), Box::new(io::stdout()))
    }

    pub fn with_writer(min_level: Level, style: ConsoleStyle, out: Box<dyn Write + Send>) -> Self {
        Self {
            min_level,
            style,
            out,
        }
    }

    pub fn accepts(&self, level: Level) -> bool {
        level >= self.min_level
    }

    pub fn style(&self) -> ConsoleStyle {
        self.style
    }

    pub fn min_level(&self) -> Level {
        self.min_level
    }

    /// Write one rendered record line.
    pub fn write(&mut self, level: Level, line: &str) -> io::Result<()> {
        match self.style {
            ConsoleStyle::Plain => writeln!(self.out, "{}", line),
            ConsoleStyle::Ansi => writeln!(self.out, "{}{}{}", level_color(level), line, RESET),
        }
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

impl std::fmt::Debug for ConsoleSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsoleSink")
            .field("min_level", &self.min_level)
            .field("style", &self.style)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::CaptureBuffer;

    #[test]
    fn test_plain_output() {
        let buffer = CaptureBuffer::new();
        let mut sink =
            ConsoleSink::with_writer(Level::Trace, ConsoleStyle::Plain, Box::new(buffer.clone()));
        sink.write(Level::Info, "[ts] [1 main] [INFO] svc: hello").unwrap();
        assert_eq!(buffer.contents(), "[ts] [1 main] [INFO] svc: hello\n");
    }

    #[test]
    fn test_ansi_output_wraps_line() {
        let buffer = CaptureBuffer::new();
        let mut sink =
            ConsoleSink::with_writer(Level::Trace, ConsoleStyle::Ansi, Box::new(buffer.clone()));
        sink.write(Level::Error, "boom").unwrap();
        assert_eq!(buffer.contents(), "\x1b[31mboom\x1b[0m\n");
    }

    #[test]
    fn test_threshold() {
        let sink = ConsoleSink::with_writer(Level::Warn, ConsoleStyle::Plain, Box::new(io::sink()));
        assert!(!sink.accepts(Level::Info));
        assert!(sink.accepts(Level::Warn));
        assert!(sink.accepts(Level::Critical));
    }

    #[test]
    fn test_explicit_choices_skip_detection() {
        assert_eq!(ConsoleStyle::detect(ColorChoice::Always), ConsoleStyle::Ansi);
        assert_eq!(ConsoleStyle::detect(ColorChoice::Never), ConsoleStyle::Plain);
    }
}
