//! # Job Consumer
//!
//! One long-lived consume loop per configured source folder, each a
//! separately failing and recovering unit. A loop connects a channel,
//! declares its queue set's topology, and drains the primary queue until a
//! channel error (sleep, reconnect) or shutdown.
//!
//! ## Retry/dead-letter protocol
//!
//! Per delivered message, driven entirely by the `x-retry-count` and
//! `x-first-seen` headers:
//!
//! 1. Undecodable payload: dropped. Retries cannot fix a decoding failure.
//! 2. Handler success: ack.
//! 3. Handler failure below the retry budget: the original, unmodified body
//!    is republished to the retry exchange with the counter incremented and
//!    first-seen preserved, then the original delivery is acked. The broker
//!    redelivers it to the primary queue once the retry queue's TTL lapses.
//! 4. Handler failure at the budget: republished to the dead exchange,
//!    terminal. Recovery is manual.
//!
//! Handler errors never propagate out of the loop - they are fully resolved
//! here, so a failing handler cannot stall or crash consumption.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn, Instrument};

use crate::config::BrokerConfig;
use crate::messaging::broker::BrokerClient;
use crate::messaging::message::{
    header_i64, retry_headers, JobMessage, FIRST_SEEN_HEADER, RETRY_COUNT_HEADER,
};
use crate::messaging::topology::{
    declare_topology, QueueSet, DEAD_EXCHANGE, RETRY_EXCHANGE,
};
use crate::messaging::MessagingError;
use crate::queue::OperationType;

/// Failure reported by a job handler. Drives the retry/dead-letter protocol;
/// the consumer does not interpret the message beyond logging it.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct HandlerError {
    pub message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Processes one decoded job message.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, message: JobMessage) -> Result<(), HandlerError>;
}

/// What to do with a delivery whose handler failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureVerdict {
    /// Republish to the retry exchange carrying the incremented counter
    Retry { next_retry_count: i64 },
    /// Republish to the dead exchange, terminal
    DeadLetter,
}

/// Pure retry-budget decision, kept separate from the channel plumbing.
fn resolve_failure(retry_count: i64, max_retries: u32) -> FailureVerdict {
    if retry_count < i64::from(max_retries) {
        FailureVerdict::Retry {
            next_retry_count: retry_count + 1,
        }
    } else {
        FailureVerdict::DeadLetter
    }
}

/// Broker-side consumer: spawns and runs the per-source consume loops.
pub struct JobConsumer {
    broker: Arc<BrokerClient>,
    handler: Arc<dyn JobHandler>,
    config: BrokerConfig,
    shutdown: watch::Receiver<bool>,
}

impl JobConsumer {
    pub fn new(
        broker: Arc<BrokerClient>,
        handler: Arc<dyn JobHandler>,
        config: BrokerConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            broker,
            handler,
            config,
            shutdown,
        }
    }

    /// Spawn one consume loop per configured source folder.
    pub fn spawn_all(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        self.config
            .sources
            .iter()
            .map(|source| {
                let consumer = Arc::clone(self);
                let source = source.clone();
                tokio::spawn(async move { consumer.run_source(source).await })
            })
            .collect()
    }

    /// Consume loop for one source. Exits only when shutdown fires.
    async fn run_source(&self, source: String) {
        let set = QueueSet::build(OperationType::Load, Some(&source));
        let mut shutdown = self.shutdown.clone();
        info!(source = %source, queue = %set.queue, "consume loop starting");

        loop {
            if shutdown.has_changed().is_err() || *shutdown.borrow() {
                break;
            }

            match self.consume_until_error(&set, &mut shutdown).await {
                Ok(()) => break, // shutdown observed inside the loop
                Err(err) => {
                    warn!(
                        source = %source,
                        error = %err,
                        "consume loop error; reconnecting after delay"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.reconnect_delay()) => {}
                        _ = shutdown.changed() => {}
                    }
                }
            }
        }

        info!(source = %source, "consume loop stopped");
    }

    /// Connect, declare, and drain the primary queue until an error or
    /// shutdown. Infrastructure errors bubble up; handler errors do not.
    async fn consume_until_error(
        &self,
        set: &QueueSet,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), MessagingError> {
        let channel = self.broker.open_channel().await?;
        channel
            .basic_qos(self.config.prefetch_count, BasicQosOptions::default())
            .await
            .map_err(|e| MessagingError::consume(&set.queue, format!("qos: {e}")))?;

        declare_topology(&channel, set, self.config.first_backoff()).await?;

        let mut deliveries = channel
            .basic_consume(
                &set.queue,
                &format!("cashbox-ingest.{}", set.routing_key),
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| MessagingError::consume(&set.queue, e.to_string()))?;

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    // A dropped shutdown sender means the system is gone.
                    if changed.is_err() || *shutdown.borrow() {
                        return Ok(());
                    }
                }
                delivery = deliveries.next() => {
                    match delivery {
                        None => {
                            return Err(MessagingError::consume(
                                &set.queue,
                                "delivery stream closed",
                            ));
                        }
                        Some(Err(err)) => {
                            return Err(MessagingError::consume(&set.queue, err.to_string()));
                        }
                        Some(Ok(delivery)) => {
                            self.process_delivery(&channel, set, delivery).await?;
                        }
                    }
                }
            }
        }
    }

    /// Run one delivery through the retry/dead-letter protocol.
    ///
    /// Only channel-level failures (ack/publish) return an error; in that
    /// case the delivery stays unacked and the broker will redeliver it
    /// after reconnect.
    async fn process_delivery(
        &self,
        channel: &Channel,
        set: &QueueSet,
        delivery: Delivery,
    ) -> Result<(), MessagingError> {
        let tag = delivery.delivery_tag;

        let message = match JobMessage::from_bytes(&delivery.data) {
            Ok(message) => message,
            Err(err) => {
                // A decoding failure can never succeed on retry. An ack (not
                // a nack) keeps the drop out of the terminal queue, which the
                // primary queue's dead-letter wiring would otherwise capture.
                warn!(queue = %set.queue, error = %err, "dropping malformed message");
                return channel
                    .basic_ack(tag, BasicAckOptions::default())
                    .await
                    .map_err(|e| MessagingError::consume(&set.queue, format!("ack: {e}")));
            }
        };

        let span = tracing::info_span!(
            "job",
            request_id = %message.request_id,
            date = %message.date,
        );
        let result = self.handler.handle(message.clone()).instrument(span).await;

        if let Err(err) = result {
            let retry_count =
                header_i64(&delivery.properties, RETRY_COUNT_HEADER).unwrap_or(0);
            let first_seen = header_i64(&delivery.properties, FIRST_SEEN_HEADER)
                .map(|v| v as u64)
                .or_else(|| delivery.properties.timestamp().as_ref().copied())
                .unwrap_or_else(|| Utc::now().timestamp() as u64);

            match resolve_failure(retry_count, self.config.max_retries) {
                FailureVerdict::Retry { next_retry_count } => {
                    warn!(
                        request_id = %message.request_id,
                        attempt = next_retry_count,
                        error = %err,
                        "handler failed; republishing to retry queue"
                    );
                    self.republish(
                        channel,
                        RETRY_EXCHANGE,
                        &set.retry_routing_key,
                        &delivery.data,
                        next_retry_count,
                        first_seen,
                    )
                    .await?;
                }
                FailureVerdict::DeadLetter => {
                    error!(
                        request_id = %message.request_id,
                        retries = retry_count,
                        error = %err,
                        "retry budget exhausted; dead-lettering"
                    );
                    self.republish(
                        channel,
                        DEAD_EXCHANGE,
                        &set.dead_routing_key,
                        &delivery.data,
                        retry_count,
                        first_seen,
                    )
                    .await?;
                }
            }
        }

        // Success and both failure placements all leave the primary queue.
        channel
            .basic_ack(tag, BasicAckOptions::default())
            .await
            .map_err(|e| MessagingError::consume(&set.queue, format!("ack: {e}")))
    }

    /// Republish the original body with updated retry headers.
    async fn republish(
        &self,
        channel: &Channel,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        retry_count: i64,
        first_seen: u64,
    ) -> Result<(), MessagingError> {
        let properties = BasicProperties::default()
            .with_delivery_mode(2)
            .with_content_type("application/json".into())
            .with_headers(retry_headers(retry_count, first_seen));

        let confirm = channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                body,
                properties,
            )
            .await
            .map_err(|e| MessagingError::publish(routing_key, e.to_string()))?;
        confirm
            .await
            .map_err(|e| MessagingError::publish(routing_key, e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_failure_retries() {
        assert_eq!(
            resolve_failure(0, 3),
            FailureVerdict::Retry {
                next_retry_count: 1
            }
        );
    }

    #[test]
    fn test_last_budgeted_failure_still_retries() {
        assert_eq!(
            resolve_failure(2, 3),
            FailureVerdict::Retry {
                next_retry_count: 3
            }
        );
    }

    #[test]
    fn test_budget_exhaustion_dead_letters() {
        assert_eq!(resolve_failure(3, 3), FailureVerdict::DeadLetter);
        assert_eq!(resolve_failure(7, 3), FailureVerdict::DeadLetter);
    }

    #[test]
    fn test_zero_budget_dead_letters_immediately() {
        assert_eq!(resolve_failure(0, 0), FailureVerdict::DeadLetter);
    }

    #[test]
    fn test_always_failing_handler_visits_exactly_max_retries() {
        // Walk the counter the way redeliveries would: the message passes
        // through the retry queue exactly max_retries times, then lands in
        // the dead-letter queue once.
        let max_retries: u32 = 3;
        let mut retry_count = 0_i64;
        let mut retries: u32 = 0;

        loop {
            match resolve_failure(retry_count, max_retries) {
                FailureVerdict::Retry { next_retry_count } => {
                    retries += 1;
                    retry_count = next_retry_count;
                }
                FailureVerdict::DeadLetter => break,
            }
        }

        assert_eq!(retries, max_retries);
        assert_eq!(retry_count, i64::from(max_retries));
    }
}
