//! # Operation Queue Manager
//!
//! One bounded queue and on-demand drain worker per operation type.
//!
//! ## Guarantees
//!
//! - Strict FIFO, one-at-a-time processing within an operation type: the
//!   bounded channel preserves order and the receiver sits behind a mutex,
//!   so even a racing second worker serializes behind the first.
//! - Full concurrency across operation types.
//! - Non-blocking enqueue: a full queue rejects the submission immediately.
//! - Stop signals are observed between items, never mid-item.
//!
//! The drain worker deactivates and exits when its queue runs dry, so idle
//! operation types consume no running task; the next enqueue starts a fresh
//! worker. An enqueue arriving mid-drain is picked up by the running loop,
//! not a new worker.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::queue::item::{OperationType, QueueItem};

/// In-process queue errors
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("queue for operation '{operation}' is full (capacity {capacity})")]
    Full {
        operation: OperationType,
        capacity: usize,
    },

    #[error("queue for operation '{operation}' is stopped")]
    Stopped { operation: OperationType },
}

/// Processing function invoked per dequeued item.
///
/// Invoked to completion for one item before the next is dequeued.
pub type ProcessFn = Arc<dyn Fn(QueueItem) -> BoxFuture<'static, ()> + Send + Sync>;

/// Bounded FIFO for one operation type.
///
/// Created once per type on first use and retained for process lifetime.
struct OperationQueue {
    sender: mpsc::Sender<QueueItem>,
    receiver: Mutex<mpsc::Receiver<QueueItem>>,
    /// True while a drain worker owns this queue
    active: AtomicBool,
    stop: watch::Receiver<bool>,
}

impl OperationQueue {
    fn new(capacity: usize, stop: watch::Receiver<bool>) -> Self {
        let (sender, receiver) = mpsc::channel(capacity);
        Self {
            sender,
            receiver: Mutex::new(receiver),
            active: AtomicBool::new(false),
            stop,
        }
    }

    fn depth(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

/// Lazy map of operation queues plus the drain workers over them.
pub struct OperationQueueManager {
    queues: RwLock<HashMap<OperationType, Arc<OperationQueue>>>,
    capacity: usize,
    stop_tx: watch::Sender<bool>,
    workers: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl OperationQueueManager {
    /// Create a manager with the given per-queue capacity.
    pub fn new(capacity: usize) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            queues: RwLock::new(HashMap::new()),
            capacity,
            stop_tx,
            workers: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Enqueue an item onto its operation type's queue.
    ///
    /// Never blocks: a full queue fails immediately and leaves the depth
    /// unchanged.
    pub async fn enqueue(&self, item: QueueItem) -> Result<(), QueueError> {
        let operation = item.operation;
        let queue = self.get_or_create(operation).await;

        queue.sender.try_send(item).map_err(|err| match err {
            TrySendError::Full(_) => QueueError::Full {
                operation,
                capacity: self.capacity,
            },
            TrySendError::Closed(_) => QueueError::Stopped { operation },
        })
    }

    /// Start a drain worker for the operation type unless one is already
    /// active. The worker processes items strictly one at a time and exits
    /// once the queue runs dry.
    pub async fn start_worker_if_idle(&self, operation: OperationType, process: ProcessFn) {
        let queue = self.get_or_create(operation).await;

        if queue
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return; // a worker already owns this queue
        }

        debug!(operation = %operation, "starting drain worker");
        let handle = tokio::spawn(drain(queue, process));

        let mut workers = self.workers.lock();
        workers.retain(|worker| !worker.is_finished());
        workers.push(handle);
    }

    /// Signal every queue's stop channel. Workers observe it between items.
    pub fn stop_all(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Stop all workers and wait for them to exit, bounded by the deadline.
    ///
    /// On deadline expiry shutdown proceeds anyway; the residual depth is
    /// logged, not drained.
    pub async fn shutdown(&self, deadline: Duration) {
        self.stop_all();

        let handles: Vec<JoinHandle<()>> = {
            let mut workers = self.workers.lock();
            workers.drain(..).collect()
        };

        let drain_all = async {
            for handle in handles {
                let _ = handle.await;
            }
        };

        if tokio::time::timeout(deadline, drain_all).await.is_err() {
            let residual = self.total_size().await;
            warn!(
                residual,
                deadline_seconds = deadline.as_secs(),
                "shutdown deadline exceeded; abandoning in-process queue drain"
            );
        }
    }

    /// Queue depth for one operation type.
    pub async fn size_for(&self, operation: OperationType) -> usize {
        let queues = self.queues.read().await;
        queues.get(&operation).map(|q| q.depth()).unwrap_or(0)
    }

    /// Total depth across all operation types.
    pub async fn total_size(&self) -> usize {
        let queues = self.queues.read().await;
        queues.values().map(|q| q.depth()).sum()
    }

    /// Number of operation types with an active drain worker.
    pub async fn active_type_count(&self) -> usize {
        let queues = self.queues.read().await;
        queues.values().filter(|q| q.is_active()).count()
    }

    /// Per-type depth snapshot for status reporting.
    pub async fn depths(&self) -> HashMap<OperationType, usize> {
        let queues = self.queues.read().await;
        queues
            .iter()
            .map(|(operation, queue)| (*operation, queue.depth()))
            .collect()
    }

    async fn get_or_create(&self, operation: OperationType) -> Arc<OperationQueue> {
        {
            let queues = self.queues.read().await;
            if let Some(queue) = queues.get(&operation) {
                return Arc::clone(queue);
            }
        }

        let mut queues = self.queues.write().await;
        Arc::clone(queues.entry(operation).or_insert_with(|| {
            Arc::new(OperationQueue::new(self.capacity, self.stop_tx.subscribe()))
        }))
    }
}

/// Drain loop: process one item at a time until the queue runs dry or the
/// stop signal fires.
async fn drain(queue: Arc<OperationQueue>, process: ProcessFn) {
    // Holding the receiver lock for the whole drain is what serializes
    // workers: a racing starter blocks here until this loop is done.
    let mut receiver = queue.receiver.lock().await;

    loop {
        if *queue.stop.borrow() {
            queue.active.store(false, Ordering::Release);
            break;
        }

        match receiver.try_recv() {
            Ok(item) => process(item).await,
            Err(TryRecvError::Empty) => {
                queue.active.store(false, Ordering::Release);

                // An enqueue may have landed between the empty read and the
                // deactivation; its start_worker_if_idle call could have
                // found the flag still set and not spawned. One more look
                // under the receiver lock closes that window.
                match receiver.try_recv() {
                    Ok(item) => {
                        queue.active.store(true, Ordering::Release);
                        process(item).await;
                    }
                    Err(_) => break,
                }
            }
            Err(TryRecvError::Disconnected) => {
                queue.active.store(false, Ordering::Release);
                break;
            }
        }
    }
}
