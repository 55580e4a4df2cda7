//! # Dispatcher
//!
//! Chooses, per accepted request, between the in-process path and the broker
//! path.
//!
//! `download` operations always stay in-process - they must stream through
//! the owning process's response sink. `load` operations go to the broker
//! when one is available; the dispatcher lazily declares the topology for
//! the (operation, source) pair before every publish.
//!
//! Fallback to the in-process provider happens exactly once, at startup, if
//! the initial broker connection fails. A publish failure mid-flight is a
//! dispatch failure surfaced to the original caller, never a silent detour.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;

use crate::messaging::message::retry_headers;
use crate::messaging::{BrokerClient, JobMessage, MessagingError, QueueSet};
use crate::queue::{OperationQueueManager, OperationType, ProcessFn, QueueError, QueueItem};

/// Where a dispatched item ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchTarget {
    /// Enqueued onto the in-process operation queue
    InProcess,
    /// Published to the broker's requests exchange
    Broker,
}

/// Dispatch failure surfaced to the submitting caller
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Broker(#[from] MessagingError),
}

/// Routes accepted requests to a queue path and starts in-process workers.
pub struct Dispatcher {
    manager: Arc<OperationQueueManager>,
    broker: Option<Arc<BrokerClient>>,
    process: ProcessFn,
    first_backoff: Duration,
}

impl Dispatcher {
    pub fn new(
        manager: Arc<OperationQueueManager>,
        broker: Option<Arc<BrokerClient>>,
        process: ProcessFn,
        first_backoff: Duration,
    ) -> Self {
        Self {
            manager,
            broker,
            process,
            first_backoff,
        }
    }

    /// Provider name for status reporting.
    pub fn provider(&self) -> &'static str {
        if self.broker.is_some() {
            "rabbitmq"
        } else {
            "in_process"
        }
    }

    /// Route one item. Everything past a successful return is asynchronous
    /// and surfaces only through the eventual report.
    pub async fn dispatch(&self, item: QueueItem) -> Result<DispatchTarget, DispatchError> {
        match item.operation {
            OperationType::Download => self.enqueue_in_process(item).await,
            OperationType::Load => match &self.broker {
                Some(broker) => self.publish_to_broker(broker, item).await,
                None => self.enqueue_in_process(item).await,
            },
        }
    }

    async fn enqueue_in_process(&self, item: QueueItem) -> Result<DispatchTarget, DispatchError> {
        let operation = item.operation;
        self.manager.enqueue(item).await?;
        self.manager
            .start_worker_if_idle(operation, Arc::clone(&self.process))
            .await;
        Ok(DispatchTarget::InProcess)
    }

    async fn publish_to_broker(
        &self,
        broker: &Arc<BrokerClient>,
        item: QueueItem,
    ) -> Result<DispatchTarget, DispatchError> {
        let set = QueueSet::build(item.operation, item.source_folder.as_deref());
        broker.declare_topology(&set, self.first_backoff).await?;

        let message = JobMessage::new(
            item.request_id,
            item.date,
            item.operation,
            item.source_folder.clone(),
        );
        let headers = retry_headers(0, Utc::now().timestamp() as u64);
        broker
            .publish(&set.routing_key, &message.to_bytes()?, headers)
            .await?;

        Ok(DispatchTarget::Broker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use futures::FutureExt;
    use tokio::sync::mpsc;

    fn business_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 12, 1).unwrap()
    }

    fn counting_process(done: mpsc::UnboundedSender<uuid::Uuid>) -> ProcessFn {
        Arc::new(move |item: QueueItem| {
            let done = done.clone();
            async move {
                let _ = done.send(item.request_id);
            }
            .boxed()
        })
    }

    #[tokio::test]
    async fn test_load_without_broker_runs_in_process() {
        let manager = Arc::new(OperationQueueManager::new(10));
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher::new(
            Arc::clone(&manager),
            None,
            counting_process(done_tx),
            Duration::from_secs(60),
        );
        assert_eq!(dispatcher.provider(), "in_process");

        let item = QueueItem::load(business_date(), None);
        let expected = item.request_id;
        let target = dispatcher.dispatch(item).await.unwrap();
        assert_eq!(target, DispatchTarget::InProcess);

        let processed = tokio::time::timeout(Duration::from_secs(5), done_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(processed, expected);
    }

    #[tokio::test]
    async fn test_download_stays_in_process_even_with_broker() {
        // The broker client is lazy, so if the download path ever touched
        // it the unreachable URL would surface as a dispatch error.
        let manager = Arc::new(OperationQueueManager::new(10));
        let broker = Arc::new(BrokerClient::new("amqp://unreachable.invalid:5672/%2f"));
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher::new(
            Arc::clone(&manager),
            Some(broker),
            counting_process(done_tx),
            Duration::from_secs(60),
        );
        assert_eq!(dispatcher.provider(), "rabbitmq");

        let (sink, _stream) = mpsc::channel(1);
        let item = QueueItem::download(business_date(), Some("store-001".to_string()), sink);
        let target = dispatcher.dispatch(item).await.unwrap();
        assert_eq!(target, DispatchTarget::InProcess);

        tokio::time::timeout(Duration::from_secs(5), done_rx.recv())
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_full_queue_surfaces_as_dispatch_error() {
        let manager = Arc::new(OperationQueueManager::new(1));
        // A process function that never runs: no worker is started because
        // we enqueue directly through the manager first.
        manager
            .enqueue(QueueItem::load(business_date(), None))
            .await
            .unwrap();

        let (done_tx, _done_rx) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher::new(
            Arc::clone(&manager),
            None,
            counting_process(done_tx),
            Duration::from_secs(60),
        );

        let err = dispatcher
            .dispatch(QueueItem::load(business_date(), None))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Queue(QueueError::Full { capacity: 1, .. })
        ));
    }
}
