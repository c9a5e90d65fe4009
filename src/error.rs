//! Error handling for the MediFlow pipeline core
//!
//! This module defines custom error types and a Result alias for use
//! throughout the crate.

use thiserror::Error;

/// Main error type for MediFlow operations
#[derive(Error, Debug)]
pub enum MediFlowError {
    /// Invalid parameter value, rejected before any state change
    #[error("Configuration error: {0}")]
    Config(String),

    /// Required input/connection missing or node state not ready
    #[error("Precondition not met: {0}")]
    Precondition(String),

    /// Connected input has the wrong shape or kind for this node
    #[error("Invalid input on port {port}: {message}")]
    InvalidInput { port: usize, message: String },

    /// A data handle outlived its backing buffers
    #[error("Stale data: {0}")]
    StaleData(String),

    /// Program build or dispatch failure, fatal for the issuing node
    #[error("Device error: {0}")]
    Device(String),

    /// Normal end-of-stream signal, consumed by streamers to drive
    /// looping/termination decisions
    #[error("End of stream reached")]
    EndOfStream,

    /// Cooperative cancellation observed inside a producer loop
    #[error("Thread stopped")]
    ThreadStopped,

    /// Errors related to channel communication
    #[error("Channel error: {0}")]
    Channel(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<MediFlowError>,
    },
}

impl MediFlowError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        MediFlowError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Whether this error is the normal end-of-stream signal rather
    /// than a failure.
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, MediFlowError::EndOfStream)
    }
}

/// Result type alias for MediFlow operations
pub type Result<T> = std::result::Result<T, MediFlowError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}
