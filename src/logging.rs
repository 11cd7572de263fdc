//! Logging capability injected into the scrape core.
//!
//! The pool manager, the pool update protocol and the reconciler never reach
//! for a global logger. They are handed a [`Logger`] once at construction (or
//! per call) and emit through it. The binary wires in [`TracingLogger`], which
//! forwards everything to `tracing`; tests can plug in their own recorder.

use std::sync::Arc;

/// Narrow message sink used by the scrape core.
pub trait Logger: Send + Sync {
    fn debug(&self, message: &str);
    fn info(&self, message: &str);
    fn warn(&self, message: &str);
    fn error(&self, message: &str);
}

/// Type alias for a logger shared between pool workers.
pub type SharedLogger = Arc<dyn Logger>;

/// Logger that forwards to the process-wide `tracing` subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl TracingLogger {
    pub fn shared() -> SharedLogger {
        Arc::new(TracingLogger)
    }
}

impl Logger for TracingLogger {
    fn debug(&self, message: &str) {
        tracing::debug!(target: "phpfpm", "{}", message);
    }

    fn info(&self, message: &str) {
        tracing::info!(target: "phpfpm", "{}", message);
    }

    fn warn(&self, message: &str) {
        tracing::warn!(target: "phpfpm", "{}", message);
    }

    fn error(&self, message: &str) {
        tracing::error!(target: "phpfpm", "{}", message);
    }
}

/// Logger that drops every message.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLogger;

impl Logger for NullLogger {
    fn debug(&self, _message: &str) {}
    fn info(&self, _message: &str) {}
    fn warn(&self, _message: &str) {}
    fn error(&self, _message: &str) {}
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::Logger;
    use std::sync::Mutex;

    /// Captures messages per level so tests can assert on anomalies.
    #[derive(Default)]
    pub struct RecordingLogger {
        pub warnings: Mutex<Vec<String>>,
        pub errors: Mutex<Vec<String>>,
    }

    impl RecordingLogger {
        pub fn warnings(&self) -> Vec<String> {
            self.warnings.lock().map(|g| g.clone()).unwrap_or_default()
        }

        pub fn errors(&self) -> Vec<String> {
            self.errors.lock().map(|g| g.clone()).unwrap_or_default()
        }
    }

    impl Logger for RecordingLogger {
        fn debug(&self, _message: &str) {}
        fn info(&self, _message: &str) {}

        fn warn(&self, message: &str) {
            if let Ok(mut guard) = self.warnings.lock() {
                guard.push(message.to_string());
            }
        }

        fn error(&self, message: &str) {
            if let Ok(mut guard) = self.errors.lock() {
                guard.push(message.to_string());
            }
        }
    }
}
