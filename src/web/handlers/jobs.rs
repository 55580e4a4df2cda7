//! # Job Submission Handler
//!
//! Accepts asynchronous work requests. A `load` request returns `202
//! Accepted` immediately - everything past a successful dispatch is
//! asynchronous and surfaces only through the eventual webhook report. A
//! `download` request holds the connection open and streams the export back
//! through it, which is why downloads can never be routed to the broker.

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::ReceiverStream;
use tracing::info;
use uuid::Uuid;

use crate::dispatch::DispatchTarget;
use crate::queue::{OperationType, QueueItem};
use crate::web::errors::ApiError;
use crate::web::state::AppState;

/// Export responses are buffered this many chunks ahead of the client.
const DOWNLOAD_CHANNEL_CAPACITY: usize = 16;

/// Job submission payload
#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    /// Business date, `YYYY-MM-DD`
    pub date: String,
    /// `load` or `download`
    pub operation: String,
    /// Optional source folder (cashbox) identifier
    pub source_folder: Option<String>,
}

/// Accepted-job response for `load` submissions
#[derive(Debug, Serialize)]
pub struct SubmitJobResponse {
    pub request_id: Uuid,
    pub date: NaiveDate,
    pub operation: OperationType,
    /// Which path the job was queued on
    pub queued: &'static str,
}

/// Submit a job: POST /jobs
pub async fn submit_job(
    State(state): State<AppState>,
    Json(body): Json<SubmitJobRequest>,
) -> Result<Response, ApiError> {
    let operation = OperationType::parse(&body.operation).ok_or_else(|| {
        ApiError::bad_request(format!(
            "unknown operation '{}'; expected 'load' or 'download'",
            body.operation
        ))
    })?;

    let date = NaiveDate::parse_from_str(&body.date, "%Y-%m-%d")
        .map_err(|_| ApiError::bad_request(format!("invalid date '{}'", body.date)))?;

    match operation {
        OperationType::Load => submit_load(&state, date, body.source_folder).await,
        OperationType::Download => submit_download(&state, date, body.source_folder).await,
    }
}

async fn submit_load(
    state: &AppState,
    date: NaiveDate,
    source_folder: Option<String>,
) -> Result<Response, ApiError> {
    let item = QueueItem::load(date, source_folder);
    let request_id = item.request_id;

    let target = state.dispatcher.dispatch(item).await?;
    info!(
        request_id = %request_id,
        date = %date,
        target = ?target,
        "load job accepted"
    );

    let response = SubmitJobResponse {
        request_id,
        date,
        operation: OperationType::Load,
        queued: match target {
            DispatchTarget::InProcess => "in_process",
            DispatchTarget::Broker => "broker",
        },
    };
    Ok((StatusCode::ACCEPTED, Json(response)).into_response())
}

async fn submit_download(
    state: &AppState,
    date: NaiveDate,
    source_folder: Option<String>,
) -> Result<Response, ApiError> {
    let (sink, stream) = tokio::sync::mpsc::channel(DOWNLOAD_CHANNEL_CAPACITY);
    let item = QueueItem::download(date, source_folder, sink);
    let request_id = item.request_id;

    state.dispatcher.dispatch(item).await?;
    info!(request_id = %request_id, date = %date, "download job accepted; streaming");

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-request-id", request_id.to_string())
        .body(Body::from_stream(ReceiverStream::new(stream)))
        .map_err(|_| ApiError::Internal)?;
    Ok(response)
}
