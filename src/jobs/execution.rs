//! # Job Execution & Report Race
//!
//! Runs one unit of work and guarantees a single outbound report, no matter
//! how pipeline completion and the optional report deadline race.
//!
//! The pipeline runs as an independent task that records its outcome into a
//! shared report slot and then fires two one-shot signals: pipeline
//! finished, report payload ready. The waiting side either sees completion
//! first (wait briefly for the payload, send) or the deadline first
//! (synthesize a timeout report from whatever is recorded, send
//! immediately). A checked-and-set flag under the slot's lock makes the send
//! at-most-once regardless of which paths reach it.
//!
//! A timeout never cancels the pipeline task. It keeps running to
//! completion; its eventual outcome is discarded because a second
//! transmission is forbidden.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

use crate::jobs::report::{ReportDelivery, ReportStatus, WebhookReport};
use crate::messaging::consumer::{HandlerError, JobHandler};
use crate::messaging::JobMessage;
use crate::pipeline::{Pipeline, PipelineError, TransactionExporter};
use crate::queue::{OperationType, ProcessFn, QueueItem};

/// Bounded wait for the report payload after the pipeline signals
/// completion. A safety valve, not an expected wait.
const REPORT_READY_GRACE: Duration = Duration::from_secs(2);

/// Failure message attached to a synthesized timeout report
const TIMEOUT_MESSAGE: &str = "job did not complete before the configured report deadline";

/// Per-request report record plus the once-flag guarding its transmission.
/// Scoped to one request's lifetime; never shared across requests.
struct ReportSlot {
    report: WebhookReport,
    sent: bool,
}

/// Executes jobs and owns the report race.
pub struct JobExecutor {
    pipeline: Arc<dyn Pipeline>,
    exporter: Arc<dyn TransactionExporter>,
    reports: Arc<dyn ReportDelivery>,
    report_timeout: Option<Duration>,
}

impl JobExecutor {
    pub fn new(
        pipeline: Arc<dyn Pipeline>,
        exporter: Arc<dyn TransactionExporter>,
        reports: Arc<dyn ReportDelivery>,
        report_timeout: Option<Duration>,
    ) -> Self {
        Self {
            pipeline,
            exporter,
            reports,
            report_timeout,
        }
    }

    /// In-process path entry: process one dequeued item to completion.
    ///
    /// Errors are logged, not retried - the retry protocol belongs to the
    /// broker path.
    pub async fn process_item(&self, item: QueueItem) {
        let span = item.span.clone();
        async {
            match item.operation {
                OperationType::Load => {
                    if let Err(err) = self
                        .execute_load(item.request_id, item.date, item.source_folder)
                        .await
                    {
                        error!(error = %err, "in-process load job failed");
                    }
                }
                OperationType::Download => self.execute_download(item).await,
            }
        }
        .instrument(span)
        .await
    }

    /// Run a `load` job with the report race.
    ///
    /// The returned result reflects the pipeline outcome when completion won
    /// the race; a fired deadline resolves to `Ok` because the work is still
    /// running and a redelivery would duplicate it.
    pub async fn execute_load(
        &self,
        request_id: Uuid,
        date: NaiveDate,
        source_folder: Option<String>,
    ) -> Result<(), HandlerError> {
        let slot = Arc::new(Mutex::new(ReportSlot {
            report: WebhookReport::processing(request_id, date),
            sent: false,
        }));
        let (done_tx, done_rx) = oneshot::channel::<Result<(), PipelineError>>();
        let (ready_tx, ready_rx) = oneshot::channel::<()>();

        let pipeline = Arc::clone(&self.pipeline);
        let task_slot = Arc::clone(&slot);
        tokio::spawn(
            async move {
                let outcome = pipeline.run(date, source_folder.as_deref()).await;
                {
                    let mut slot = task_slot.lock();
                    match &outcome {
                        Ok(run) => slot.report.complete(run),
                        Err(err) => slot.report.fail(err.to_string()),
                    }
                }
                let _ = done_tx.send(outcome.map(|_| ()));
                let _ = ready_tx.send(());
            }
            .in_current_span(),
        );

        let completion = match self.report_timeout {
            None => Some(Self::completion_result(done_rx.await)),
            Some(deadline) => {
                tokio::select! {
                    result = done_rx => Some(Self::completion_result(result)),
                    _ = tokio::time::sleep(deadline) => None,
                }
            }
        };

        match completion {
            Some(result) => {
                // Completion won: wait briefly for the recorded payload.
                match tokio::time::timeout(REPORT_READY_GRACE, ready_rx).await {
                    Ok(_) => self.send_report_once(&slot).await,
                    Err(_) => warn!(
                        request_id = %request_id,
                        "report payload not ready within grace period; skipping send"
                    ),
                }
                result.map_err(|err| HandlerError::new(err.to_string()))
            }
            None => {
                // Deadline won: report whatever is recorded right now,
                // overriding a still-processing state to timeout.
                {
                    let mut slot = slot.lock();
                    if slot.report.status == ReportStatus::Processing {
                        slot.report.timeout(TIMEOUT_MESSAGE);
                    }
                }
                warn!(request_id = %request_id, "report deadline elapsed before completion");
                self.send_report_once(&slot).await;
                Ok(())
            }
        }
    }

    /// Run a `download` job, streaming the export through the item's sink.
    ///
    /// The outcome surfaces through the response stream itself; downloads
    /// produce no webhook report.
    async fn execute_download(&self, item: QueueItem) {
        let Some(sink) = item.sink else {
            error!("download item arrived without a response sink");
            return;
        };

        match self
            .exporter
            .export(item.date, item.source_folder.as_deref(), sink)
            .await
        {
            Ok(transactions) => {
                info!(transactions, "export stream completed");
            }
            Err(err) => {
                // The dropped sink ends the response; nothing to retry.
                error!(error = %err, "export stream failed");
            }
        }
    }

    fn completion_result(
        received: Result<Result<(), PipelineError>, oneshot::error::RecvError>,
    ) -> Result<(), PipelineError> {
        received.unwrap_or_else(|_| Err(PipelineError::new("pipeline task terminated abnormally")))
    }

    /// Transmit the report at most once, no matter how many paths call this.
    async fn send_report_once(&self, slot: &Arc<Mutex<ReportSlot>>) {
        let report = {
            let mut slot = slot.lock();
            if slot.sent {
                return;
            }
            slot.sent = true;
            slot.report.clone()
        };

        // Delivery failures count as sent; the invariant is one attempt.
        if let Err(err) = self.reports.deliver(&report).await {
            warn!(
                request_id = %report.request_id,
                error = %err,
                "webhook delivery failed"
            );
        }
    }
}

#[async_trait]
impl JobHandler for JobExecutor {
    async fn handle(&self, message: JobMessage) -> Result<(), HandlerError> {
        self.execute_load(message.request_id, message.date, message.source_folder)
            .await
    }
}

/// Build the in-process queue's processing function from an executor.
pub fn process_fn(executor: Arc<JobExecutor>) -> ProcessFn {
    Arc::new(move |item: QueueItem| {
        let executor = Arc::clone(&executor);
        async move { executor.process_item(item).await }.boxed()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{ExportSink, PipelineRun};
    use std::collections::HashMap;

    /// Pipeline double: fixed outcome after an optional delay.
    struct FakePipeline {
        delay: Duration,
        outcome: Result<PipelineRun, PipelineError>,
    }

    #[async_trait]
    impl Pipeline for FakePipeline {
        async fn run(
            &self,
            _date: NaiveDate,
            _source: Option<&str>,
        ) -> Result<PipelineRun, PipelineError> {
            tokio::time::sleep(self.delay).await;
            self.outcome.clone()
        }
    }

    struct FakeExporter {
        payload: Vec<u8>,
    }

    #[async_trait]
    impl TransactionExporter for FakeExporter {
        async fn export(
            &self,
            _date: NaiveDate,
            _source: Option<&str>,
            sink: ExportSink,
        ) -> Result<u64, PipelineError> {
            sink.send(Ok(bytes::Bytes::from(self.payload.clone())))
                .await
                .map_err(|_| PipelineError::new("sink closed"))?;
            Ok(1)
        }
    }

    /// Report recorder standing in for the webhook endpoint.
    #[derive(Default)]
    struct RecordingDelivery {
        reports: Mutex<Vec<WebhookReport>>,
    }

    #[async_trait]
    impl ReportDelivery for RecordingDelivery {
        async fn deliver(&self, report: &WebhookReport) -> Result<(), crate::jobs::ReportError> {
            self.reports.lock().push(report.clone());
            Ok(())
        }
    }

    fn business_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 12, 1).unwrap()
    }

    fn successful_run(transactions: u64) -> PipelineRun {
        PipelineRun {
            files_processed: 2,
            files_skipped: 0,
            transactions_loaded: transactions,
            error_count: 0,
            per_table: HashMap::from([("transactions".to_string(), transactions)]),
        }
    }

    fn executor(
        pipeline: FakePipeline,
        reports: Arc<RecordingDelivery>,
        report_timeout: Option<Duration>,
    ) -> JobExecutor {
        JobExecutor::new(
            Arc::new(pipeline),
            Arc::new(FakeExporter {
                payload: b"export".to_vec(),
            }),
            reports,
            report_timeout,
        )
    }

    #[tokio::test]
    async fn test_successful_load_sends_single_completed_report() {
        let reports = Arc::new(RecordingDelivery::default());
        let executor = executor(
            FakePipeline {
                delay: Duration::ZERO,
                outcome: Ok(successful_run(10)),
            },
            Arc::clone(&reports),
            None,
        );

        executor
            .execute_load(Uuid::new_v4(), business_date(), None)
            .await
            .unwrap();

        let sent = reports.reports.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].status, ReportStatus::Completed);
        assert!(sent[0].success);
        assert_eq!(sent[0].transactions_loaded, 10);
    }

    #[tokio::test]
    async fn test_failed_load_reports_failure_and_returns_error() {
        let reports = Arc::new(RecordingDelivery::default());
        let executor = executor(
            FakePipeline {
                delay: Duration::ZERO,
                outcome: Err(PipelineError::new("source folder unreachable")),
            },
            Arc::clone(&reports),
            None,
        );

        let err = executor
            .execute_load(Uuid::new_v4(), business_date(), None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("source folder unreachable"));

        let sent = reports.reports.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].status, ReportStatus::Failed);
        assert!(!sent[0].success);
    }

    #[tokio::test]
    async fn test_slow_pipeline_yields_single_timeout_report() {
        let reports = Arc::new(RecordingDelivery::default());
        let executor = executor(
            FakePipeline {
                delay: Duration::from_millis(300),
                outcome: Ok(successful_run(10)),
            },
            Arc::clone(&reports),
            Some(Duration::from_millis(50)),
        );

        let started = std::time::Instant::now();
        executor
            .execute_load(Uuid::new_v4(), business_date(), None)
            .await
            .unwrap();

        // The report arrives at roughly the deadline, far before the
        // pipeline's 300ms.
        assert!(started.elapsed() < Duration::from_millis(250));
        {
            let sent = reports.reports.lock();
            assert_eq!(sent.len(), 1);
            assert_eq!(sent[0].status, ReportStatus::Timeout);
            assert!(!sent[0].success);
        }

        // The pipeline finishes in the background; no second report may
        // ever appear.
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(reports.reports.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_fast_pipeline_beats_generous_deadline() {
        let reports = Arc::new(RecordingDelivery::default());
        let executor = executor(
            FakePipeline {
                delay: Duration::ZERO,
                outcome: Ok(successful_run(3)),
            },
            Arc::clone(&reports),
            Some(Duration::from_secs(30)),
        );

        executor
            .execute_load(Uuid::new_v4(), business_date(), None)
            .await
            .unwrap();

        let sent = reports.reports.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].status, ReportStatus::Completed);
    }

    #[tokio::test]
    async fn test_download_streams_through_sink() {
        let reports = Arc::new(RecordingDelivery::default());
        let executor = executor(
            FakePipeline {
                delay: Duration::ZERO,
                outcome: Ok(successful_run(0)),
            },
            Arc::clone(&reports),
            None,
        );

        let (sink, mut stream) = tokio::sync::mpsc::channel(4);
        let item = QueueItem::download(business_date(), Some("store-001".to_string()), sink);
        executor.process_item(item).await;

        let chunk = stream.recv().await.unwrap().unwrap();
        assert_eq!(&chunk[..], b"export");
        // Exporter done, sink dropped, stream ends.
        assert!(stream.recv().await.is_none());

        // Downloads never produce webhook reports.
        assert!(reports.reports.lock().is_empty());
    }
}
