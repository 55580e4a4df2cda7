//! # Application State
//!
//! Shared state handed to every handler. Cheap to clone - everything behind
//! it is reference-counted.

use std::sync::Arc;

use crate::config::IngestConfig;
use crate::dispatch::Dispatcher;
use crate::messaging::{BrokerClient, DeadLetterRequeuer, ManagementClient};
use crate::queue::OperationQueueManager;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<IngestConfig>,
    pub dispatcher: Arc<Dispatcher>,
    pub manager: Arc<OperationQueueManager>,
    /// Present only when the broker provider is active
    pub broker: Option<Arc<BrokerClient>>,
    /// Present only when the broker provider is active
    pub management: Option<Arc<ManagementClient>>,
    /// Present only when the broker provider is active
    pub requeuer: Option<Arc<DeadLetterRequeuer>>,
}
