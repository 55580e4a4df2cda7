//! # Webhook Reports
//!
//! The single terminal record describing one job's outcome, and the HTTP
//! delivery client. A non-2xx response from the webhook endpoint is logged
//! by the caller and still counts as sent - delivery is not retried.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config::WebhookConfig;
use crate::pipeline::PipelineRun;

/// Report lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Processing,
    Completed,
    Failed,
    Timeout,
}

/// Outcome record for one request. Exactly one instance is ever transmitted
/// per execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookReport {
    pub request_id: Uuid,
    pub date: NaiveDate,
    pub status: ReportStatus,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    pub files_processed: u64,
    pub files_skipped: u64,
    pub transactions_loaded: u64,
    pub error_count: u64,
    pub per_table: HashMap<String, u64>,
}

impl WebhookReport {
    /// Fresh report for a request entering processing.
    pub fn processing(request_id: Uuid, date: NaiveDate) -> Self {
        Self {
            request_id,
            date,
            status: ReportStatus::Processing,
            success: false,
            message: None,
            started_at: Utc::now(),
            finished_at: None,
            duration_ms: None,
            files_processed: 0,
            files_skipped: 0,
            transactions_loaded: 0,
            error_count: 0,
            per_table: HashMap::new(),
        }
    }

    /// Record a successful pipeline run.
    pub fn complete(&mut self, run: &PipelineRun) {
        self.status = ReportStatus::Completed;
        self.success = true;
        self.files_processed = run.files_processed;
        self.files_skipped = run.files_skipped;
        self.transactions_loaded = run.transactions_loaded;
        self.error_count = run.error_count;
        self.per_table = run.per_table.clone();
        self.finish();
    }

    /// Record a pipeline failure.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = ReportStatus::Failed;
        self.success = false;
        self.message = Some(message.into());
        self.finish();
    }

    /// Mark the report as timed out.
    pub fn timeout(&mut self, message: impl Into<String>) {
        self.status = ReportStatus::Timeout;
        self.success = false;
        self.message = Some(message.into());
        self.finish();
    }

    fn finish(&mut self) {
        let finished = Utc::now();
        self.duration_ms = Some(
            (finished - self.started_at)
                .num_milliseconds()
                .max(0) as u64,
        );
        self.finished_at = Some(finished);
    }
}

/// Webhook delivery failure
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("webhook transport error: {0}")]
    Transport(String),

    #[error("webhook endpoint returned status {0}")]
    Status(u16),
}

/// Delivers a finished report to its destination.
#[async_trait]
pub trait ReportDelivery: Send + Sync {
    async fn deliver(&self, report: &WebhookReport) -> Result<(), ReportError>;
}

/// HTTP POST delivery with an optional bearer token.
#[derive(Debug, Clone)]
pub struct WebhookClient {
    url: String,
    token: Option<String>,
    http: reqwest::Client,
}

impl WebhookClient {
    pub fn new(config: &WebhookConfig) -> Self {
        Self {
            url: config.url.clone(),
            token: config.token.clone(),
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ReportDelivery for WebhookClient {
    async fn deliver(&self, report: &WebhookReport) -> Result<(), ReportError> {
        let mut request = self.http.post(&self.url).json(report);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ReportError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ReportError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}
