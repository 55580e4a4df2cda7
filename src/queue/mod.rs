//! # In-Process Operation Queues
//!
//! Local execution path: one bounded FIFO queue and at most one drain worker
//! per operation type. `download` jobs always run here because they stream
//! through the originating connection; `load` jobs run here when the broker
//! provider is disabled or unavailable at startup.
//!
//! Queue state is volatile by design - entries are lost on crash. The
//! broker-backed path is the durable one.

pub mod item;
pub mod manager;

pub use item::{OperationType, QueueItem};
pub use manager::{OperationQueueManager, ProcessFn, QueueError};
