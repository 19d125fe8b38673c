use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::{
    QueueConfig, QueueError, QueueResult,
    clock::{Clock, SystemClock},
    codec::{json::JsonDocumentCodec, DocumentCodec},
    fetched::FetchedJob,
    monitoring::QueueMonitor,
    observability::ObservabilityLayer,
    reaper::LeaseReaper,
    retry::with_retries,
    store::{collect_query, BoxStream, DocumentStore},
    types::{
        fields, record::to_epoch_millis, DocumentQuery, EntryId, Filter, JobId, LeaseRecord,
        PatchOperation, Projection, QueueEvent, WriteCondition, QUEUE_PARTITION,
    },
};

/// Candidates examined per queue in one fetch pass
const FETCH_BATCH_SIZE: usize = 10;

/// Everything a queue, its handles, monitor and reaper share
pub(crate) struct LeaseContext<S: DocumentStore + ?Sized> {
    pub(crate) store: Arc<S>,
    pub(crate) codec: Arc<dyn DocumentCodec>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) config: QueueConfig,
    pub(crate) observability: ObservabilityLayer,
}

impl<S: DocumentStore + ?Sized> Clone for LeaseContext<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            codec: self.codec.clone(),
            clock: self.clock.clone(),
            config: self.config.clone(),
            observability: self.observability.clone(),
        }
    }
}

impl<S: DocumentStore + ?Sized> LeaseContext<S> {
    /// Conditional patch keyed on the record's last known version
    pub(crate) async fn patch_record(
        &self,
        record: &LeaseRecord,
        operations: &[PatchOperation],
        operation_name: &str,
    ) -> QueueResult<LeaseRecord> {
        let condition = WriteCondition::IfMatch(record.version_token.clone());
        let document = with_retries(&self.config.retry, operation_name, || {
            self.store.patch(&record.id, QUEUE_PARTITION, operations, condition.clone())
        })
        .await?;
        self.codec.decode_document(document)
    }

    /// Conditional delete keyed on the record's last known version
    pub(crate) async fn delete_record(&self, record: &LeaseRecord) -> QueueResult<()> {
        let condition = WriteCondition::IfMatch(record.version_token.clone());
        with_retries(&self.config.retry, "remove", || {
            self.store.delete(&record.id, QUEUE_PARTITION, condition.clone())
        })
        .await
    }

    pub(crate) async fn run_query(&self, query: &DocumentQuery) -> QueueResult<Vec<serde_json::Value>> {
        with_retries(&self.config.retry, "query", || {
            collect_query(self.store.as_ref(), QUEUE_PARTITION, query)
        })
        .await
    }

    pub(crate) fn invisibility_timeout(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.config.invisibility_timeout)
            .unwrap_or_else(|_| chrono::Duration::days(365))
    }
}

/// Producer and worker entry point of a document-store backed job queue
pub struct JobQueue<S: DocumentStore + ?Sized + 'static> {
    ctx: LeaseContext<S>,
    monitor: Arc<QueueMonitor<S>>,
}

impl<S: DocumentStore + 'static> JobQueue<S> {
    /// Create a queue with default configuration over `store`
    pub fn new(store: S) -> Self {
        Self::from_arc(Arc::new(store))
    }
}

impl<S: DocumentStore + ?Sized + 'static> JobQueue<S> {
    /// Create a queue over a shared store handle
    pub fn from_arc(store: Arc<S>) -> Self {
        let ctx = LeaseContext {
            store,
            codec: Arc::new(JsonDocumentCodec),
            clock: Arc::new(SystemClock),
            config: QueueConfig::default(),
            observability: ObservabilityLayer::new(),
        };
        let monitor = Arc::new(QueueMonitor::new(ctx.clone()));
        Self { ctx, monitor }
    }

    /// Replace the configuration after validating it
    pub fn with_config(mut self, config: QueueConfig) -> QueueResult<Self> {
        config.validate()?;
        self.ctx.config = config;
        Ok(self.rebuild_monitor())
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.ctx.clock = clock;
        self.rebuild_monitor()
    }

    pub fn with_codec(mut self, codec: Arc<dyn DocumentCodec>) -> Self {
        self.ctx.codec = codec;
        self.rebuild_monitor()
    }

    pub fn with_observability(mut self, observability: ObservabilityLayer) -> Self {
        self.ctx.observability = observability;
        self.rebuild_monitor()
    }

    fn rebuild_monitor(mut self) -> Self {
        self.monitor = Arc::new(QueueMonitor::new(self.ctx.clone()));
        self
    }

    #[cfg(test)]
    pub(crate) fn context(&self) -> LeaseContext<S> {
        self.ctx.clone()
    }

    pub fn config(&self) -> &QueueConfig {
        &self.ctx.config
    }

    pub fn store(&self) -> &S {
        &self.ctx.store
    }

    pub fn observability(&self) -> &ObservabilityLayer {
        &self.ctx.observability
    }

    /// Shared read-only monitoring API (one queue-name cache per queue)
    pub fn monitor(&self) -> Arc<QueueMonitor<S>> {
        self.monitor.clone()
    }

    /// Background sweeper for abandoned leases
    pub fn reaper(&self) -> LeaseReaper<S> {
        LeaseReaper::new(self.ctx.clone())
    }

    /// Lifecycle events of this queue and its handles
    pub fn event_stream(&self) -> BoxStream<QueueEvent> {
        self.ctx.observability.event_stream()
    }

    /// Add a job reference to `queue`
    #[instrument(skip(self, job_id), fields(queue = %queue))]
    pub async fn enqueue(&self, queue: &str, job_id: impl Into<JobId>) -> QueueResult<EntryId> {
        if queue.trim().is_empty() {
            return Err(QueueError::invalid("queue name must not be empty"));
        }

        let now = self.ctx.clock.now();
        let record = LeaseRecord::new(job_id.into(), queue, now);
        let body = self.ctx.codec.encode_record(&record)?;

        with_retries(&self.ctx.config.retry, "enqueue", || {
            self.ctx.store.create(QUEUE_PARTITION, body.clone())
        })
        .await?;

        self.ctx.observability.record_enqueued(&record, now);
        info!("Enqueued job [{}] to queue [{}]", record.job_id, record.name);
        Ok(record.id)
    }

    /// Claim the oldest available entry among `queues`, waiting until one
    /// shows up or `cancel` fires.
    ///
    /// Queues are tried in the given order. Leases whose keep-alive is older
    /// than the invisibility timeout count as available.
    #[instrument(skip(self, cancel), fields(queues = ?queues))]
    pub async fn fetch(&self, queues: &[&str], cancel: &CancellationToken) -> QueueResult<FetchedJob<S>> {
        if queues.is_empty() {
            return Err(QueueError::invalid("at least one queue is required"));
        }

        loop {
            if cancel.is_cancelled() {
                return Err(QueueError::Cancelled);
            }

            if let Some(job) = self.try_fetch(queues).await? {
                return Ok(job);
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(QueueError::Cancelled),
                _ = tokio::time::sleep(self.ctx.config.fetch_poll_interval) => {}
            }
        }
    }

    /// One claim pass over `queues` without waiting
    pub async fn try_fetch(&self, queues: &[&str]) -> QueueResult<Option<FetchedJob<S>>> {
        if queues.is_empty() {
            return Err(QueueError::invalid("at least one queue is required"));
        }

        for queue in queues {
            let now = self.ctx.clock.now();
            let stale_before = to_epoch_millis(now - self.ctx.invisibility_timeout());

            let query = DocumentQuery::select(Projection::Document)
                .filter(Filter::All(vec![
                    Filter::eq(fields::NAME, "@name"),
                    Filter::Any(vec![
                        Filter::is_unset(fields::FETCHED_AT),
                        Filter::lt(fields::FETCHED_AT, "@timeout"),
                    ]),
                ]))
                .order_by(fields::CREATED_ON)
                .page(0, FETCH_BATCH_SIZE)
                .with_parameter("@name", *queue)
                .with_parameter("@timeout", stale_before);

            for value in self.ctx.run_query(&query).await? {
                let candidate = self.ctx.codec.decode_value(value)?;
                let operations = [PatchOperation::set(
                    PatchOperation::field_path(fields::FETCHED_AT),
                    to_epoch_millis(now),
                )];

                match self.ctx.patch_record(&candidate, &operations, "fetch").await {
                    Ok(record) => {
                        self.ctx.observability.record_fetched(&record, now);
                        debug!("Fetched job [{}] from queue [{}]", record.job_id, record.name);
                        return Ok(Some(FetchedJob::new(self.ctx.clone(), record)));
                    }
                    Err(e) if e.is_conflict() || e.is_not_found() => {
                        debug!("Entry [{}] was claimed by another worker", candidate.id);
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        Ok(None)
    }
}

impl<S: DocumentStore + ?Sized + 'static> Clone for JobQueue<S> {
    fn clone(&self) -> Self {
        Self {
            ctx: self.ctx.clone(),
            monitor: self.monitor.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::memory::MemoryDocumentStore;
    use crate::WriteOutcome;
    use chrono::Duration as ChronoDuration;
    use std::time::Duration;

    fn queue_with_clock() -> (MemoryDocumentStore, ManualClock, JobQueue<MemoryDocumentStore>) {
        let store = MemoryDocumentStore::new();
        let clock = ManualClock::default();
        let queue = JobQueue::new(store.clone()).with_clock(Arc::new(clock.clone()));
        (store, clock, queue)
    }

    #[tokio::test]
    async fn enqueue_creates_available_entry() {
        let (store, _clock, queue) = queue_with_clock();
        let id = queue.enqueue("default", "42").await.unwrap();

        let document = store.read(&id, QUEUE_PARTITION).await.unwrap();
        let record: LeaseRecord = serde_json::from_value(document.body).unwrap();
        assert!(record.is_available());
        assert_eq!(record.job_id, JobId::from("42"));
        assert_eq!(record.name, "default");
    }

    #[tokio::test]
    async fn enqueue_rejects_blank_queue_name() {
        let (_store, _clock, queue) = queue_with_clock();
        assert!(matches!(queue.enqueue("  ", "1").await, Err(QueueError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn fetch_claims_oldest_entry_first() {
        let (_store, clock, queue) = queue_with_clock();
        queue.enqueue("default", "first").await.unwrap();
        clock.advance(ChronoDuration::milliseconds(5));
        queue.enqueue("default", "second").await.unwrap();

        let mut job = queue.try_fetch(&["default"]).await.unwrap().unwrap();
        assert_eq!(job.job_id(), JobId::from("first"));
        assert_eq!(job.queue(), "default");
        assert!(job.fetched_at().is_some());
        job.dispose().await;
    }

    #[tokio::test]
    async fn leased_entries_are_not_fetched_twice() {
        let (_store, _clock, queue) = queue_with_clock();
        queue.enqueue("default", "1").await.unwrap();

        let mut job = queue.try_fetch(&["default"]).await.unwrap().unwrap();
        assert!(queue.try_fetch(&["default"]).await.unwrap().is_none());
        job.remove_from_queue().await;
        job.dispose().await;
    }

    #[tokio::test]
    async fn queues_are_tried_in_order() {
        let (_store, clock, queue) = queue_with_clock();
        queue.enqueue("low", "old-low").await.unwrap();
        clock.advance(ChronoDuration::milliseconds(5));
        queue.enqueue("critical", "new-critical").await.unwrap();

        let mut job = queue.try_fetch(&["critical", "low"]).await.unwrap().unwrap();
        assert_eq!(job.job_id(), JobId::from("new-critical"));
        job.dispose().await;
    }

    #[tokio::test]
    async fn abandoned_lease_is_reclaimed_after_invisibility_timeout() {
        let (_store, clock, queue) = queue_with_clock();
        queue.enqueue("default", "1").await.unwrap();
        let first = queue.try_fetch(&["default"]).await.unwrap().unwrap();

        clock.advance(ChronoDuration::seconds(301));
        let mut second = queue.try_fetch(&["default"]).await.unwrap().unwrap();
        assert_eq!(second.entry_id(), first.entry_id());

        // The first holder lost the lease: its writes now conflict
        assert_eq!(first.keep_alive().await, WriteOutcome::Conflict);
        assert_eq!(first.remove_from_queue().await, WriteOutcome::Conflict);
        assert_eq!(second.remove_from_queue().await, WriteOutcome::Applied);
        second.dispose().await;
    }

    #[tokio::test]
    async fn fetch_requires_queues() {
        let (_store, _clock, queue) = queue_with_clock();
        let cancel = CancellationToken::new();
        assert!(matches!(queue.fetch(&[], &cancel).await, Err(QueueError::InvalidArgument(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_waits_for_work() {
        let (_store, _clock, queue) = queue_with_clock();
        let producer = queue.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            producer.enqueue("default", "late").await.unwrap();
        });

        let cancel = CancellationToken::new();
        let mut job = queue.fetch(&["default"], &cancel).await.unwrap();
        assert_eq!(job.job_id(), JobId::from("late"));
        job.dispose().await;
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_stops_on_cancellation() {
        let (_store, _clock, queue) = queue_with_clock();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            trigger.cancel();
        });

        let result = queue.fetch(&["default"], &cancel).await;
        assert!(matches!(result, Err(QueueError::Cancelled)));
    }

    #[tokio::test]
    async fn transient_query_failures_are_retried() {
        let (store, _clock, queue) = queue_with_clock();
        let queue = queue
            .with_config(QueueConfig::default().with_retry(crate::RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
                jitter: false,
            }))
            .unwrap();
        queue.enqueue("default", "1").await.unwrap();

        store.fail_next(QueueError::Throttled { retry_after_ms: 1 });
        let mut job = queue.try_fetch(&["default"]).await.unwrap().unwrap();
        job.dispose().await;
    }
}
