//! # Top-Level Error Types
//!
//! Crate-wide error enum for bootstrap and lifecycle code paths. Subsystems
//! define their own structured errors (`MessagingError`, `QueueError`,
//! `ApiError`) and convert into `IngestError` at the wiring layer.

use thiserror::Error;

use crate::messaging::MessagingError;
use crate::queue::QueueError;

/// Result alias used throughout bootstrap and lifecycle code
pub type IngestResult<T> = Result<T, IngestError>;

/// Top-level service error
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Messaging error: {0}")]
    Messaging(#[from] MessagingError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Web server error: {0}")]
    WebServer(String),
}

impl IngestError {
    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create a web server error
    pub fn web_server(message: impl Into<String>) -> Self {
        Self::WebServer(message.into())
    }
}

impl From<config::ConfigError> for IngestError {
    fn from(err: config::ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}
