//! # Pipeline Collaborator Boundary
//!
//! The ETL pipeline (fetch/parse/load) and the transaction exporter are
//! external collaborators: this service consumes each as a single call and
//! never looks inside. The traits here are the whole contract; deployment
//! binaries supply the implementations when wiring up
//! [`bootstrap::IngestSystem`](crate::bootstrap::IngestSystem).
//!
//! Retrying a failed pipeline run is NOT this layer's job. Retry belongs to
//! the broker consumer protocol; a direct invocation reports the failure and
//! stops.

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::NaiveDate;
use thiserror::Error;
use tokio::sync::mpsc;

/// Counts produced by one pipeline run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineRun {
    /// Source files fully processed
    pub files_processed: u64,
    /// Source files skipped (already loaded, unparseable name, etc.)
    pub files_skipped: u64,
    /// Transactions loaded across all tables
    pub transactions_loaded: u64,
    /// Row-level errors tolerated during the run
    pub error_count: u64,
    /// Rows loaded per destination table
    pub per_table: HashMap<String, u64>,
}

/// Pipeline failure, opaque to this service
#[derive(Error, Debug, Clone)]
#[error("pipeline run failed: {message}")]
pub struct PipelineError {
    pub message: String,
}

impl PipelineError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// The data-load collaborator.
///
/// Treated as an opaque, possibly long-running, blocking call that returns
/// counts or fails.
#[async_trait]
pub trait Pipeline: Send + Sync {
    async fn run(
        &self,
        date: NaiveDate,
        source: Option<&str>,
    ) -> Result<PipelineRun, PipelineError>;
}

/// Byte sink for a streamed export response.
///
/// A `download` job owns the originating connection's response body; the
/// exporter writes chunks here and the HTTP layer streams them out. Closing
/// the sender ends the response.
pub type ExportSink = mpsc::Sender<Result<Bytes, std::io::Error>>;

/// The data-export collaborator.
///
/// Reads back loaded transactions for the given date/source and streams them
/// into the sink. Returns the number of transactions written.
#[async_trait]
pub trait TransactionExporter: Send + Sync {
    async fn export(
        &self,
        date: NaiveDate,
        source: Option<&str>,
        sink: ExportSink,
    ) -> Result<u64, PipelineError>;
}
