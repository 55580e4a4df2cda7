//! # Queue Topology
//!
//! Pure mapping from (operation, source folder) to the three-queue set that
//! implements primary/retry/dead-letter routing, plus the idempotent
//! declaration procedure.
//!
//! Redelivery after backoff is the broker's job: the retry queue carries a
//! message TTL equal to the configured backoff and dead-letters expired
//! messages back to the requests exchange at the original routing key.
//! Terminal dead-lettering is the application's job: the consumer
//! republishes exhausted messages to the dead exchange itself. The primary
//! queue still carries dead-letter arguments pointing at its own set's dead
//! routing key so that a rejected delivery can never cross into another
//! operation/cashbox's terminal queue.

use std::time::Duration;

use lapin::options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{Channel, ExchangeKind};

use crate::messaging::MessagingError;
use crate::queue::OperationType;

/// Topic exchange new requests are published to
pub const REQUESTS_EXCHANGE: &str = "cashbox.requests";
/// Topic exchange holding messages waiting out a retry backoff
pub const RETRY_EXCHANGE: &str = "cashbox.retry";
/// Topic exchange for terminal dead-letter placement
pub const DEAD_EXCHANGE: &str = "cashbox.dead";

/// Token used when a request names no source folder
const DEFAULT_SOURCE: &str = "default";

/// The derived queue names and routing keys for one (operation, source)
/// pair. Never stored - recomputed wherever needed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSet {
    /// Primary queue the consumer drains
    pub queue: String,
    /// Holding queue that delays redelivery by the backoff TTL
    pub retry_queue: String,
    /// Terminal queue for exhausted messages
    pub dead_queue: String,
    /// Routing key on the requests exchange
    pub routing_key: String,
    /// Routing key on the retry exchange
    pub retry_routing_key: String,
    /// Routing key on the dead exchange
    pub dead_routing_key: String,
}

impl QueueSet {
    /// Derive the queue set for an operation and optional source folder.
    ///
    /// Pure and deterministic: two sources that normalize to the same token
    /// share a queue set, which is expected.
    pub fn build(operation: OperationType, source: Option<&str>) -> Self {
        let token = source
            .map(normalize_source)
            .unwrap_or_else(|| DEFAULT_SOURCE.to_string());
        let base = format!("{}.{}", operation.as_str(), token);

        Self {
            queue: format!("cashbox.{base}"),
            retry_queue: format!("cashbox.{base}.retry"),
            dead_queue: format!("cashbox.{base}.dead"),
            routing_key: base.clone(),
            retry_routing_key: format!("{base}.retry"),
            dead_routing_key: format!("{base}.dead"),
        }
    }
}

/// Normalize a source folder identifier into a queue-name-safe token.
///
/// Lower-cases and replaces anything outside `[a-z0-9_-]` with `_`.
pub fn normalize_source(source: &str) -> String {
    source
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'a'..='z' | '0'..='9' | '_' | '-' => c,
            _ => '_',
        })
        .collect()
}

/// Declare the exchanges, queues, and bindings for one queue set.
///
/// Idempotent and safe to call repeatedly - the dispatcher calls it lazily
/// before every publish and each consume loop calls it on (re)connect.
pub async fn declare_topology(
    channel: &Channel,
    set: &QueueSet,
    retry_backoff: Duration,
) -> Result<(), MessagingError> {
    for exchange in [REQUESTS_EXCHANGE, RETRY_EXCHANGE, DEAD_EXCHANGE] {
        channel
            .exchange_declare(
                exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                MessagingError::queue_operation(exchange, "exchange_declare", e.to_string())
            })?;
    }

    // Primary queue. Its dead-letter arguments keep any rejected delivery
    // inside this queue set's terminal queue.
    let mut primary_args = FieldTable::default();
    primary_args.insert(
        "x-dead-letter-exchange".into(),
        AMQPValue::LongString(DEAD_EXCHANGE.into()),
    );
    primary_args.insert(
        "x-dead-letter-routing-key".into(),
        AMQPValue::LongString(set.dead_routing_key.clone().into()),
    );
    declare_and_bind(
        channel,
        &set.queue,
        REQUESTS_EXCHANGE,
        &set.routing_key,
        primary_args,
    )
    .await?;

    // Retry queue. TTL expiry dead-letters back to the requests exchange at
    // the original routing key, which is what redelivers after the backoff.
    let mut retry_args = FieldTable::default();
    retry_args.insert(
        "x-message-ttl".into(),
        AMQPValue::LongLongInt(retry_backoff.as_millis() as i64),
    );
    retry_args.insert(
        "x-dead-letter-exchange".into(),
        AMQPValue::LongString(REQUESTS_EXCHANGE.into()),
    );
    retry_args.insert(
        "x-dead-letter-routing-key".into(),
        AMQPValue::LongString(set.routing_key.clone().into()),
    );
    declare_and_bind(
        channel,
        &set.retry_queue,
        RETRY_EXCHANGE,
        &set.retry_routing_key,
        retry_args,
    )
    .await?;

    // Terminal dead-letter queue. Nothing dead-letters out of it
    // automatically; recovery is manual.
    declare_and_bind(
        channel,
        &set.dead_queue,
        DEAD_EXCHANGE,
        &set.dead_routing_key,
        FieldTable::default(),
    )
    .await?;

    Ok(())
}

async fn declare_and_bind(
    channel: &Channel,
    queue: &str,
    exchange: &str,
    routing_key: &str,
    args: FieldTable,
) -> Result<(), MessagingError> {
    channel
        .queue_declare(
            queue,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            args,
        )
        .await
        .map_err(|e| MessagingError::queue_operation(queue, "queue_declare", e.to_string()))?;

    channel
        .queue_bind(
            queue,
            exchange,
            routing_key,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(|e| MessagingError::queue_operation(queue, "queue_bind", e.to_string()))?;

    Ok(())
}
