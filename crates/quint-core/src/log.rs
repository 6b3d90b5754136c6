// SPDX-License-Identifier: CEPL-1.0
//! Leveled diagnostics with any number of attached sinks.
//!
//! A [`Logger`] is built once at startup and handed out as `Arc<Logger>` to the
//! subsystems that report lifecycle transitions. Having no sinks is valid: the
//! messages are dropped and nothing else changes.

use std::fmt;
use std::io::Write;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LogLevel {
    Info,
    Debug,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        })
    }
}

/// Destination for leveled messages. Implementations must not panic.
pub trait LogSink: Send + Sync {
    fn write(&self, level: LogLevel, message: &str);
}

/// Broadcasts every message to all attached sinks, in attach order.
#[derive(Default)]
pub struct Logger {
    sinks: Vec<Box<dyn LogSink>>,
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

impl Logger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: impl LogSink + 'static) -> Self {
        self.attach(sink);
        self
    }

    pub fn attach(&mut self, sink: impl LogSink + 'static) {
        self.sinks.push(Box::new(sink));
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    pub fn write(&self, level: LogLevel, message: &str) {
        for sink in &self.sinks {
            sink.write(level, message);
        }
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.write(LogLevel::Info, message.as_ref());
    }

    pub fn debug(&self, message: impl AsRef<str>) {
        self.write(LogLevel::Debug, message.as_ref());
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        self.write(LogLevel::Warn, message.as_ref());
    }

    pub fn error(&self, message: impl AsRef<str>) {
        self.write(LogLevel::Error, message.as_ref());
    }
}

/// Forwards into the `tracing` subscriber installed by [`crate::init_tracing`].
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn write(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Info => tracing::info!("{message}"),
            LogLevel::Debug => tracing::debug!("{message}"),
            LogLevel::Warn => tracing::warn!("{message}"),
            LogLevel::Error => tracing::error!("{message}"),
        }
    }
}

/// Plain terminal output with colored level prefixes.
///
/// Errors go to stderr, everything else to stdout. Debug lines are only
/// printed in debug builds.
#[derive(Clone, Copy, Debug, Default)]
pub struct TerminalSink;

impl TerminalSink {
    fn prefix(level: LogLevel) -> Option<&'static str> {
        match level {
            LogLevel::Info => Some("[information] "),
            LogLevel::Debug if cfg!(debug_assertions) => Some("\x1b[33m[debug]\x1b[0m "),
            LogLevel::Debug => None,
            LogLevel::Warn => Some("\x1b[35m[warning]\x1b[0m "),
            LogLevel::Error => Some("\x1b[31m[error]\x1b[0m "),
        }
    }
}

impl LogSink for TerminalSink {
    fn write(&self, level: LogLevel, message: &str) {
        let Some(prefix) = Self::prefix(level) else {
            return;
        };
        // Write failures (closed pipe etc.) are ignored on purpose.
        let _ = if level == LogLevel::Error {
            writeln!(std::io::stderr().lock(), "{prefix}{message}")
        } else {
            writeln!(std::io::stdout().lock(), "{prefix}{message}")
        };
    }
}
