//! # System Bootstrap
//!
//! Wires the subsystems together and manages the service lifecycle.
//!
//! ## Provider selection
//!
//! The broker provider is chosen once, at startup: if the broker is enabled
//! in configuration and the initial connection succeeds, `load` jobs are
//! published to RabbitMQ and one consume loop per configured source is
//! spawned. If the initial connection fails the service logs the error and
//! degrades to the in-process provider for the life of the process. There is
//! no mid-flight fallback - a later publish failure surfaces to the
//! submitting caller.
//!
//! ## Shutdown
//!
//! Consumers observe a shared shutdown signal; in-process workers drain
//! under the configured deadline, and residual queue depth is logged rather
//! than blocking exit indefinitely.

use std::sync::Arc;

use axum::Router;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::IngestConfig;
use crate::dispatch::Dispatcher;
use crate::errors::{IngestError, IngestResult};
use crate::jobs::{process_fn, JobExecutor, ReportDelivery, WebhookClient};
use crate::messaging::{
    BrokerClient, DeadLetterRequeuer, JobConsumer, JobHandler, ManagementClient,
};
use crate::pipeline::{Pipeline, TransactionExporter};
use crate::queue::OperationQueueManager;
use crate::web::{self, AppState};

/// Running ingest system handle.
///
/// Deployment binaries construct this with their pipeline and exporter
/// collaborators, then either call [`serve`](Self::serve) or mount
/// [`router`](Self::router) themselves and call
/// [`shutdown`](Self::shutdown) when done.
pub struct IngestSystem {
    state: AppState,
    config: Arc<IngestConfig>,
    manager: Arc<OperationQueueManager>,
    broker: Option<Arc<BrokerClient>>,
    shutdown_tx: watch::Sender<bool>,
    consumer_handles: Vec<JoinHandle<()>>,
}

impl IngestSystem {
    /// Wire up the system: provider selection, executor, dispatcher, and
    /// broker consumers.
    pub async fn start(
        config: IngestConfig,
        pipeline: Arc<dyn Pipeline>,
        exporter: Arc<dyn TransactionExporter>,
    ) -> IngestResult<Self> {
        config.validate()?;
        let config = Arc::new(config);

        let manager = Arc::new(OperationQueueManager::new(config.queue.capacity));
        let reports: Arc<dyn ReportDelivery> = Arc::new(WebhookClient::new(&config.webhook));
        let executor = Arc::new(JobExecutor::new(
            pipeline,
            exporter,
            reports,
            config.webhook.report_timeout(),
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let broker = if config.broker.enabled {
            let client = Arc::new(BrokerClient::new(config.broker.url.clone()));
            match client.connect().await {
                Ok(()) => {
                    info!("broker provider active");
                    Some(client)
                }
                Err(err) => {
                    warn!(
                        error = %err,
                        "initial broker connection failed; degrading to in-process provider"
                    );
                    None
                }
            }
        } else {
            info!("broker provider disabled; using in-process provider");
            None
        };

        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&manager),
            broker.clone(),
            process_fn(Arc::clone(&executor)),
            config.broker.first_backoff(),
        ));

        let consumer_handles = match &broker {
            Some(client) => {
                let handler: Arc<dyn JobHandler> = executor;
                let consumer = Arc::new(JobConsumer::new(
                    Arc::clone(client),
                    handler,
                    config.broker.clone(),
                    shutdown_rx,
                ));
                consumer.spawn_all()
            }
            None => Vec::new(),
        };

        let state = AppState {
            config: Arc::clone(&config),
            dispatcher,
            manager: Arc::clone(&manager),
            broker: broker.clone(),
            management: broker
                .as_ref()
                .map(|_| Arc::new(ManagementClient::new(&config.management))),
            requeuer: broker
                .as_ref()
                .map(|client| Arc::new(DeadLetterRequeuer::new(Arc::clone(client)))),
        };

        Ok(Self {
            state,
            config,
            manager,
            broker,
            shutdown_tx,
            consumer_handles,
        })
    }

    /// Shared handler state, for embedding the router elsewhere.
    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// The service router.
    pub fn router(&self) -> Router {
        web::router(self.state.clone())
    }

    /// Serve HTTP until interrupted, then shut down gracefully.
    pub async fn serve(self) -> IngestResult<()> {
        let listener = tokio::net::TcpListener::bind(&self.config.service.bind_address)
            .await
            .map_err(|e| IngestError::web_server(e.to_string()))?;
        info!(address = %self.config.service.bind_address, "HTTP server listening");

        let router = self.router();
        axum::serve(listener, router)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
                info!("interrupt received; beginning graceful shutdown");
            })
            .await
            .map_err(|e| IngestError::web_server(e.to_string()))?;

        self.shutdown().await;
        Ok(())
    }

    /// Stop consumers, drain in-process workers under the deadline, and
    /// close the broker connection.
    pub async fn shutdown(self) {
        info!("shutdown requested");
        let _ = self.shutdown_tx.send(true);

        for handle in self.consumer_handles {
            let _ = handle.await;
        }

        self.manager
            .shutdown(self.config.queue.shutdown_timeout())
            .await;

        if let Some(broker) = &self.broker {
            broker.close().await;
        }
        info!("shutdown complete");
    }
}
