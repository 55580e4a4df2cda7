//! # Queue Introspection & Recovery Handlers
//!
//! Read-only queue status (in-process depths plus, when the broker provider
//! is active, broker-reported depths with a passive-declare fallback) and
//! the operator-invoked dead-letter requeue.

use std::collections::HashMap;
use std::time::Duration;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::messaging::{ManagedQueue, QueueSet};
use crate::queue::OperationType;
use crate::web::errors::ApiError;
use crate::web::state::AppState;

/// Queue status snapshot
#[derive(Debug, Serialize)]
pub struct QueueStatusResponse {
    /// Active provider: `rabbitmq` or `in_process`
    pub provider: String,
    /// In-process depth per operation type
    pub queues: HashMap<String, usize>,
    /// Total in-process depth
    pub total: usize,
    /// Operation types with an active drain worker
    pub active_types: usize,
    /// Broker-reported depths, present when the broker provider is active
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broker_queues: Option<Vec<ManagedQueue>>,
}

/// Queue status: GET /queues/status
pub async fn queue_status(
    State(state): State<AppState>,
) -> Result<Json<QueueStatusResponse>, ApiError> {
    let queues = state
        .manager
        .depths()
        .await
        .into_iter()
        .map(|(operation, depth)| (operation.as_str().to_string(), depth))
        .collect();

    let response = QueueStatusResponse {
        provider: state.dispatcher.provider().to_string(),
        queues,
        total: state.manager.total_size().await,
        active_types: state.manager.active_type_count().await,
        broker_queues: broker_depths(&state).await,
    };

    Ok(Json(response))
}

/// Broker-reported depths via the management API, falling back to passive
/// declares of each known queue when the endpoint is unreachable.
async fn broker_depths(state: &AppState) -> Option<Vec<ManagedQueue>> {
    let broker = state.broker.as_ref()?;

    if let Some(management) = &state.management {
        match management.list_queues("cashbox.").await {
            Ok(queues) => return Some(queues),
            Err(err) => {
                warn!(error = %err, "management API unavailable; falling back to passive declares");
            }
        }
    }

    let mut queues = Vec::new();
    for source in &state.config.broker.sources {
        let set = QueueSet::build(OperationType::Load, Some(source));
        for name in [&set.queue, &set.retry_queue, &set.dead_queue] {
            match broker.queue_depth(name).await {
                Ok(messages) => queues.push(ManagedQueue {
                    name: name.clone(),
                    messages: u64::from(messages),
                    messages_ready: u64::from(messages),
                    messages_unacknowledged: 0,
                }),
                Err(err) => {
                    warn!(queue = %name, error = %err, "passive depth check failed");
                }
            }
        }
    }
    Some(queues)
}

/// Dead-letter requeue request
#[derive(Debug, Deserialize)]
pub struct RequeueRequest {
    /// Operation type owning the queue set
    pub operation: String,
    /// Source folder (cashbox) identifier
    pub source_folder: Option<String>,
    /// Only messages at least this old are moved
    #[serde(default)]
    pub min_age_seconds: u64,
    /// Upper bound on messages moved in one invocation
    pub batch_size: u64,
}

/// Dead-letter requeue result
#[derive(Debug, Serialize)]
pub struct RequeueResponse {
    pub queue: String,
    pub requeued: u64,
    pub min_age_seconds: u64,
    pub batch_size: u64,
}

/// Manual dead-letter recovery: POST /queues/requeue
///
/// Absent (404) unless explicitly enabled in configuration.
pub async fn requeue_dead_letters(
    State(state): State<AppState>,
    Json(body): Json<RequeueRequest>,
) -> Result<Json<RequeueResponse>, ApiError> {
    if !state.config.requeue.enabled {
        return Err(ApiError::NotFound);
    }

    let requeuer = state
        .requeuer
        .as_ref()
        .ok_or_else(|| ApiError::service_unavailable("broker provider is not active"))?;

    let operation = OperationType::parse(&body.operation)
        .ok_or_else(|| ApiError::bad_request(format!("unknown operation '{}'", body.operation)))?;

    let set = QueueSet::build(operation, body.source_folder.as_deref());
    let moved = requeuer
        .requeue(
            &set,
            Duration::from_secs(body.min_age_seconds),
            body.batch_size,
        )
        .await?;

    info!(
        queue = %set.dead_queue,
        requeued = moved,
        "manual dead-letter recovery finished"
    );

    Ok(Json(RequeueResponse {
        queue: set.dead_queue,
        requeued: moved,
        min_age_seconds: body.min_age_seconds,
        batch_size: body.batch_size,
    }))
}
