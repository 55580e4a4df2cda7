//! # Cashbox Ingest
//!
//! Asynchronous dispatch service for cashbox data-load and data-export jobs.
//!
//! Every submitted job is keyed by an operation type (`load` or `download`)
//! and a business date/source folder, and is executed to completion exactly
//! once logically: bounded concurrency, strict ordering within an operation
//! type, timed retry with backoff, terminal dead-lettering, and manual
//! dead-letter recovery.
//!
//! ## Architecture
//!
//! - **`messaging`** - RabbitMQ topology (requests/retry/dead exchanges and
//!   queues), broker client, per-source consumers, dead-letter requeuer, and
//!   the management API stats client
//! - **`queue`** - in-process operation queues with one sequential drain
//!   worker per operation type
//! - **`dispatch`** - routes each job to the broker path or the in-process
//!   path based on operation type and configured provider
//! - **`jobs`** - job execution wrapper and the webhook report race that
//!   guarantees a single outcome notification per request
//! - **`pipeline`** - boundary traits for the ETL pipeline and transaction
//!   export collaborators
//! - **`web`** - axum HTTP surface: job submission, queue introspection,
//!   manual recovery, health
//! - **`bootstrap`** - wiring and lifecycle (startup provider selection,
//!   consumer spawning, graceful shutdown)

pub mod bootstrap;
pub mod config;
pub mod dispatch;
pub mod errors;
pub mod jobs;
pub mod logging;
pub mod messaging;
pub mod pipeline;
pub mod queue;
pub mod web;

pub use bootstrap::IngestSystem;
pub use config::IngestConfig;
pub use errors::{IngestError, IngestResult};
