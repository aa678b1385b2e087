//! Logging capability supplied at pool construction
//!
//! The pool never owns a process-wide logger. Each pool instance holds a
//! [`Logger`] trait object, defaulting to [`TracingLogger`], and uses it
//! purely for observability of lifecycle events.

use std::sync::Arc;

/// Logging sink used by the pool and its facades.
///
/// Implementations must be cheap to call; the pool may log from background
/// tasks (top-up failures, eviction, destroy errors).
pub trait Logger: Send + Sync {
    fn error(&self, message: &str);
    fn warn(&self, message: &str);
    fn info(&self, message: &str);
    fn debug(&self, message: &str);
}

/// Default logger forwarding to the `tracing` macros.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn error(&self, message: &str) {
        tracing::error!(target: "kvpool", "{message}");
    }

    fn warn(&self, message: &str) {
        tracing::warn!(target: "kvpool", "{message}");
    }

    fn info(&self, message: &str) {
        tracing::info!(target: "kvpool", "{message}");
    }

    fn debug(&self, message: &str) {
        tracing::debug!(target: "kvpool", "{message}");
    }
}

/// Logger that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct QuietLogger;

impl Logger for QuietLogger {
    fn error(&self, _message: &str) {}
    fn warn(&self, _message: &str) {}
    fn info(&self, _message: &str) {}
    fn debug(&self, _message: &str) {}
}

pub(crate) fn default_logger() -> Arc<dyn Logger> {
    Arc::new(TracingLogger)
}

/// Captures messages for assertions in tests.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct CapturingLogger {
    pub(crate) messages: parking_lot::Mutex<Vec<(&'static str, String)>>,
}

#[cfg(test)]
impl Logger for CapturingLogger {
    fn error(&self, message: &str) {
        self.messages.lock().push(("error", message.into()));
    }

    fn warn(&self, message: &str) {
        self.messages.lock().push(("warn", message.into()));
    }

    fn info(&self, message: &str) {
        self.messages.lock().push(("info", message.into()));
    }

    fn debug(&self, message: &str) {
        self.messages.lock().push(("debug", message.into()));
    }
}
