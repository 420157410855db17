//! Logging utilities
//!
//! The renderer never talks to a concrete logging transport. It holds a
//! [`Logger`], a cheap cloneable handle around an injected [`LogSink`]. The
//! default sink forwards to the `log` facade so applications can install
//! `env_logger` (see [`init`]) or any other backend.

use std::sync::{Arc, Mutex};

pub use log::Level;

/// Target used when forwarding to the `log` facade
pub const LOG_TARGET: &str = "mythos_renderer";

/// Receives leveled messages from the renderer
pub trait LogSink: Send + Sync {
    /// Emit a single message
    fn log(&self, level: Level, message: &str);
}

/// Sink that forwards every message to the `log` crate
#[derive(Debug, Default, Clone, Copy)]
pub struct FacadeSink;

impl LogSink for FacadeSink {
    fn log(&self, level: Level, message: &str) {
        log::log!(target: LOG_TARGET, level, "{}", message);
    }
}

/// Sink that keeps messages in memory, for tools and tests that inspect output
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<(Level, String)>>,
}

impl MemorySink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything logged so far
    pub fn records(&self) -> Vec<(Level, String)> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    /// Whether any message at `level` contains `needle`
    pub fn contains(&self, level: Level, needle: &str) -> bool {
        self.records()
            .iter()
            .any(|(l, message)| *l == level && message.contains(needle))
    }
}

impl LogSink for MemorySink {
    fn log(&self, level: Level, message: &str) {
        if let Ok(mut records) = self.records.lock() {
            records.push((level, message.to_owned()));
        }
    }
}

/// Shared handle to the injected log sink
#[derive(Clone)]
pub struct Logger {
    sink: Arc<dyn LogSink>,
}

impl Logger {
    /// Wrap a sink
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self { sink }
    }

    /// Logger forwarding to the `log` facade
    pub fn facade() -> Self {
        Self::new(Arc::new(FacadeSink))
    }

    /// Emit a message at an explicit level
    pub fn log(&self, level: Level, message: &str) {
        self.sink.log(level, message);
    }

    /// Emit a debug message
    pub fn debug(&self, message: impl AsRef<str>) {
        self.sink.log(Level::Debug, message.as_ref());
    }

    /// Emit an info message
    pub fn info(&self, message: impl AsRef<str>) {
        self.sink.log(Level::Info, message.as_ref());
    }

    /// Emit a warning
    pub fn warn(&self, message: impl AsRef<str>) {
        self.sink.log(Level::Warn, message.as_ref());
    }

    /// Emit an error
    pub fn error(&self, message: impl AsRef<str>) {
        self.sink.log(Level::Error, message.as_ref());
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::facade()
    }
}

impl std::fmt::Debug for Logger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logger").finish_non_exhaustive()
    }
}

/// Initialize the logging system
pub fn init() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();
}
