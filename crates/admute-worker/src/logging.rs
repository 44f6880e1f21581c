//! Structured stream logging utilities.
//!
//! Provides consistent, structured logging for per-stream work with
//! tracing spans and contextual information.

use tracing::{info, warn, Span};

/// Stream logger for structured logging with consistent formatting.
///
/// Carries the stream key and operation so every lifecycle event of a
/// stream session is tagged the same way.
#[derive(Debug, Clone)]
pub struct StreamLogger {
    stream_key: String,
    operation: String,
}

impl StreamLogger {
    /// Create a new logger for a stream and operation.
    ///
    /// # Arguments
    /// * `stream_key` - The stream directory name
    /// * `operation` - The type of operation (e.g., "session", "discovery")
    pub fn new(stream_key: &str, operation: &str) -> Self {
        Self {
            stream_key: stream_key.to_string(),
            operation: operation.to_string(),
        }
    }

    /// Log the start of a stream operation.
    pub fn log_start(&self, message: &str) {
        info!(
            stream_key = %self.stream_key,
            operation = %self.operation,
            "Stream started: {}", message
        );
    }

    /// Log a warning.
    pub fn log_warning(&self, message: &str) {
        warn!(
            stream_key = %self.stream_key,
            operation = %self.operation,
            "Stream warning: {}", message
        );
    }

    /// Log the completion of a stream operation.
    pub fn log_completion(&self, message: &str) {
        info!(
            stream_key = %self.stream_key,
            operation = %self.operation,
            "Stream completed: {}", message
        );
    }

    pub fn stream_key(&self) -> &str {
        &self.stream_key
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Create a tracing span for this stream.
    ///
    /// Per-stream tasks are instrumented with it so nested events carry the
    /// stream key.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "stream",
            stream_key = %self.stream_key,
            operation = %self.operation
        )
    }
}
