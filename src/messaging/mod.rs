//! # Broker Messaging
//!
//! RabbitMQ-backed delivery for `load` jobs: deterministic queue topology,
//! a lazily-connected broker client, per-source consume loops implementing
//! the retry/dead-letter protocol, manual dead-letter recovery, and queue
//! depth reporting via the management API.
//!
//! ## Topology
//!
//! Every (operation, source folder) pair maps to three queues behind three
//! durable topic exchanges:
//!
//! ```text
//! cashbox.requests --(op.source)--> cashbox.op.source          (primary)
//! cashbox.retry ----(op.source.retry)--> cashbox.op.source.retry
//!     retry queue TTL expiry dead-letters back to cashbox.requests
//! cashbox.dead -----(op.source.dead)--> cashbox.op.source.dead (terminal)
//! ```
//!
//! Dead-lettering to the terminal queue is explicit - the consumer
//! republishes exhausted messages itself - while redelivery after backoff
//! rides the broker's TTL-expiry dead-lettering from the retry queue back to
//! the requests exchange.

pub mod broker;
pub mod consumer;
pub mod errors;
pub mod management;
pub mod message;
pub mod requeue;
pub mod topology;

pub use broker::BrokerClient;
pub use consumer::{HandlerError, JobConsumer, JobHandler};
pub use errors::MessagingError;
pub use management::{ManagedQueue, ManagementClient};
pub use message::JobMessage;
pub use requeue::{DeadLetterRequeuer, RequeueError};
pub use topology::QueueSet;
