//! The queue worker.
//!
//! One poll reads up to `batch_size` recalculation messages, schedules the cells they name and
//! evaluates the batches in order. A message is archived once its cell is settled. A cell whose
//! row changed underneath it is sent back to the queue, and a cell whose write failed is left
//! for redelivery after the visibility timeout. Requests for deleted cells or columns are
//! archived, and so is any message read more than `max_deliveries` times.

use crate::config::WorkerConfig;
use crate::dependency::{load_class_columns, refresh_class_dependencies};
use crate::dependency::schedule::schedule_batches;
use crate::evaluation::{CellEvaluator, CellOutcome};
use crate::observability::{batch_span, poll_span};
use crate::ErrorKind;
use regrade_storage::{
    CellId, ClassId, ColumnId, GradebookColumn, GradebookStore, MessageId, MessageQueue,
    PageRequest, QueueMessage, RecalcRequest,
};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn, Instrument};

/// Upper bound on polls for [`QueueWorker::drain`].
pub const MAX_DRAIN_POLLS: usize = 1000;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PollReport {
    pub messages_read: usize,
    pub malformed: usize,
    pub unknown_columns: usize,
    /// Requests whose cell was deleted or moved.
    pub missing_cells: usize,
    /// Messages archived unprocessed because they kept coming back.
    pub dead_lettered: usize,
    /// Messages naming a cell another message of the same poll already named.
    pub duplicates: usize,
    pub batches: usize,
    pub cyclic_columns: Vec<ColumnId>,
    pub written: usize,
    pub failed: usize,
    pub acknowledged: usize,
    pub conflicted: usize,
    pub write_failed: usize,
    pub archived: usize,
    pub requeued: usize,
}

impl PollReport {
    fn absorb(&mut self, other: PollReport) {
        self.messages_read += other.messages_read;
        self.malformed += other.malformed;
        self.unknown_columns += other.unknown_columns;
        self.missing_cells += other.missing_cells;
        self.dead_lettered += other.dead_lettered;
        self.duplicates += other.duplicates;
        self.batches += other.batches;
        for column_id in other.cyclic_columns {
            if !self.cyclic_columns.contains(&column_id) {
                self.cyclic_columns.push(column_id);
            }
        }
        self.written += other.written;
        self.failed += other.failed;
        self.acknowledged += other.acknowledged;
        self.conflicted += other.conflicted;
        self.write_failed += other.write_failed;
        self.archived += other.archived;
        self.requeued += other.requeued;
    }
}

pub struct QueueWorker {
    store: Arc<dyn GradebookStore>,
    queue: Arc<dyn MessageQueue>,
    evaluator: CellEvaluator,
    config: WorkerConfig,
}

impl QueueWorker {
    pub fn new(
        store: Arc<dyn GradebookStore>,
        queue: Arc<dyn MessageQueue>,
        config: WorkerConfig,
    ) -> Self {
        QueueWorker {
            evaluator: CellEvaluator::new(store.clone(), config.page_size),
            store,
            queue,
            config,
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Runs one poll cycle.
    ///
    /// A prefetch failure ends the cycle with an error. Messages of batches that already ran
    /// were archived; the rest become visible again after the timeout.
    pub async fn poll_once(&self) -> Result<PollReport, ErrorKind> {
        let span = poll_span(&self.config.queue_name, self.config.batch_size);
        self.poll_inner().instrument(span).await
    }

    async fn poll_inner(&self) -> Result<PollReport, ErrorKind> {
        let mut report = PollReport::default();

        let messages = self
            .queue
            .read(
                &self.config.queue_name,
                self.config.visibility_timeout_secs,
                self.config.batch_size,
            )
            .await?;
        report.messages_read = messages.len();
        if messages.is_empty() {
            return Ok(report);
        }

        let (worklist, mut message_ids) = self.parse_messages(messages, &mut report).await;

        let column_ids: Vec<ColumnId> = worklist
            .iter()
            .map(|request| request.column_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let columns: HashMap<ColumnId, GradebookColumn> = self
            .store
            .columns_by_id(&column_ids)
            .await?
            .into_iter()
            .map(|column| (column.id, column))
            .collect();

        let mut known = Vec::with_capacity(worklist.len());
        for request in worklist {
            if columns.contains_key(&request.column_id) {
                known.push(request);
                continue;
            }

            warn!(
                column_id = request.column_id,
                cell_id = request.cell_id,
                "Column no longer exists, dropping request"
            );
            report.unknown_columns += 1;
            for msg_id in message_ids.remove(&request.cell_id).unwrap_or_default() {
                self.archive(msg_id, &mut report).await;
            }
        }

        let plan = schedule_batches(&known, &columns);
        report.cyclic_columns = plan.cyclic_columns.clone();

        for (index, batch) in plan.batches.iter().enumerate() {
            let mut outcomes: Vec<(RecalcRequest, CellOutcome)> = vec![];
            let span = batch_span(index, batch.column_ids.len(), batch.requests.len());

            let result = self
                .evaluator
                .evaluate_batch(batch, &columns, |request, outcome| {
                    outcomes.push((*request, outcome))
                })
                .instrument(span)
                .await;

            if let Err(e) = result {
                error!(batch = index, error = %e, "Batch failed, ending poll cycle");
                return Err(e);
            }
            report.batches += 1;

            for (request, outcome) in outcomes {
                let msg_ids = message_ids.remove(&request.cell_id).unwrap_or_default();
                self.settle(request, outcome, msg_ids, &mut report).await;
            }
        }

        info!(
            read = report.messages_read,
            written = report.written,
            failed = report.failed,
            conflicted = report.conflicted,
            missing_cells = report.missing_cells,
            archived = report.archived,
            "Poll cycle finished"
        );
        Ok(report)
    }

    /// Decodes messages into a deduplicated worklist, archiving the ones that are not requests
    /// and the ones that were delivered too often.
    async fn parse_messages(
        &self,
        messages: Vec<QueueMessage>,
        report: &mut PollReport,
    ) -> (Vec<RecalcRequest>, HashMap<CellId, Vec<MessageId>>) {
        let mut worklist = vec![];
        let mut message_ids: HashMap<CellId, Vec<MessageId>> = HashMap::new();

        for message in messages {
            if message.read_ct > self.config.max_deliveries {
                error!(
                    msg_id = message.msg_id,
                    read_ct = message.read_ct,
                    body = %message.message,
                    "Message exceeded its delivery limit, archiving it unprocessed"
                );
                report.dead_lettered += 1;
                self.archive(message.msg_id, report).await;
                continue;
            }

            match serde_json::from_value::<RecalcRequest>(message.message) {
                Ok(request) => {
                    let ids = message_ids.entry(request.cell_id).or_default();
                    if ids.is_empty() {
                        worklist.push(request);
                    } else {
                        report.duplicates += 1;
                    }
                    ids.push(message.msg_id);
                }
                Err(e) => {
                    warn!(
                        msg_id = message.msg_id,
                        read_ct = message.read_ct,
                        error = %e,
                        "Malformed recalculation message"
                    );
                    report.malformed += 1;
                    self.archive(message.msg_id, report).await;
                }
            }
        }

        (worklist, message_ids)
    }

    async fn settle(
        &self,
        request: RecalcRequest,
        outcome: CellOutcome,
        msg_ids: Vec<MessageId>,
        report: &mut PollReport,
    ) {
        match outcome {
            CellOutcome::Written => report.written += 1,
            CellOutcome::Failed => report.failed += 1,
            CellOutcome::Acknowledged => report.acknowledged += 1,
            CellOutcome::Gone => report.missing_cells += 1,
            CellOutcome::Conflicted => {
                report.conflicted += 1;
                if !self.requeue(&request, report).await {
                    return;
                }
            }
            CellOutcome::WriteFailed => {
                report.write_failed += 1;
                return;
            }
        }

        for msg_id in msg_ids {
            self.archive(msg_id, report).await;
        }
    }

    async fn requeue(&self, request: &RecalcRequest, report: &mut PollReport) -> bool {
        let message = match serde_json::to_value(request) {
            Ok(message) => message,
            Err(e) => {
                error!(cell_id = request.cell_id, error = %e, "Could not encode request");
                return false;
            }
        };

        match self.queue.send(&self.config.queue_name, message).await {
            Ok(_) => {
                report.requeued += 1;
                true
            }
            Err(e) => {
                warn!(cell_id = request.cell_id, error = %e, "Could not re-enqueue request");
                false
            }
        }
    }

    async fn archive(&self, msg_id: MessageId, report: &mut PollReport) {
        match self.queue.archive(&self.config.queue_name, msg_id).await {
            Ok(true) => report.archived += 1,
            Ok(false) => warn!(msg_id, "Message was already gone"),
            Err(e) => warn!(msg_id, error = %e, "Could not archive message"),
        }
    }

    /// Polls until a read comes back empty. Conflicted cells are re-enqueued and picked up by a
    /// later poll of the same drain.
    pub async fn drain(&self) -> Result<PollReport, ErrorKind> {
        let mut total = PollReport::default();

        for _ in 0..MAX_DRAIN_POLLS {
            let report = self.poll_once().await?;
            let done = report.messages_read == 0;
            total.absorb(report);
            if done {
                return Ok(total);
            }
        }

        warn!(polls = MAX_DRAIN_POLLS, "Queue did not drain");
        Ok(total)
    }

    /// Polls until `shutdown` completes, sleeping between polls that found nothing.
    pub async fn run<S>(&self, shutdown: S)
    where
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let idle = Duration::from_millis(self.config.poll_interval_ms);

        loop {
            let wait = match self.poll_once().await {
                Ok(report) if report.messages_read > 0 => Duration::from_millis(0),
                Ok(_) => idle,
                Err(e) => {
                    error!(error = %e, "Poll cycle failed");
                    idle
                }
            };

            tokio::select! {
                _ = &mut shutdown => {
                    info!("Worker shutting down");
                    return;
                }
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }
}

/// Sends a recalculation request for every cell of every formula column of a class, both tiers.
/// Returns the number of requests sent.
pub async fn enqueue_class(
    store: &dyn GradebookStore,
    queue: &dyn MessageQueue,
    queue_name: &str,
    class_id: ClassId,
    page_size: usize,
) -> Result<usize, ErrorKind> {
    let slugs: Vec<String> = load_class_columns(store, class_id, page_size)
        .await?
        .into_iter()
        .filter(|column| column.score_expression.is_some())
        .map(|column| column.slug)
        .collect();
    if slugs.is_empty() {
        return Ok(0);
    }

    let mut sent = 0;
    let mut request = Some(PageRequest::first(page_size));
    while let Some(page) = request {
        let page = store.column_cells(class_id, &slugs, &[], page).await?;
        let messages = page
            .items
            .iter()
            .map(|cell| serde_json::to_value(RecalcRequest::from(cell)))
            .collect::<Result<Vec<_>, _>>()?;

        sent += queue.send_batch(queue_name, messages).await?.len();
        request = page.next;
    }

    info!(class_id, sent, "Enqueued class for recalculation");
    Ok(sent)
}

/// Brings every class up to date on startup: refreshes the dependencies of its columns, then
/// enqueues all of its formula cells. Returns the number of requests sent.
pub async fn prepare_classes<I>(
    store: &dyn GradebookStore,
    queue: &dyn MessageQueue,
    config: &WorkerConfig,
    class_ids: I,
) -> Result<usize, ErrorKind>
where
    I: IntoIterator<Item = ClassId>,
{
    let mut enqueued = 0;

    for class_id in class_ids {
        let refreshed = refresh_class_dependencies(store, class_id, config.page_size).await?;
        info!(class_id, refreshed, "Refreshed column dependencies");
        enqueued += enqueue_class(
            store,
            queue,
            &config.queue_name,
            class_id,
            config.page_size,
        )
        .await?;
    }

    Ok(enqueued)
}
