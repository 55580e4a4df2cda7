//! # Web API
//!
//! HTTP surface for job submission, queue introspection, manual dead-letter
//! recovery, and health checks. Everything except `/health` sits behind the
//! bearer-token middleware (a no-op when auth is disabled in configuration).

pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod state;

use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::Router;

pub use errors::ApiError;
pub use state::AppState;

/// Build the service router.
pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/jobs", post(handlers::jobs::submit_job))
        .route("/queues/status", get(handlers::queues::queue_status))
        .route("/queues/requeue", post(handlers::queues::requeue_dead_letters))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::auth::require_auth,
        ));

    Router::new()
        .route("/health", get(handlers::health::basic_health))
        .merge(protected)
        .with_state(state)
}
