use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use proptest::prelude::*;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use dog_lease::{
    Document, DocumentQuery, EntryId, JobId, JobQueue, LeaseRecord, ManualClock, MemoryDocumentStore,
    PatchOperation, QueueConfig, QueueError, QueueEvent, QueueResult, WriteCondition, WriteOutcome,
    DocumentStore,
    prelude::async_trait,
    store::BoxStream,
    types::QUEUE_PARTITION,
};

/// Test factory functions
fn create_test_queue() -> (MemoryDocumentStore, ManualClock, JobQueue<MemoryDocumentStore>) {
    let store = MemoryDocumentStore::new();
    let clock = ManualClock::default();
    let queue = JobQueue::new(store.clone()).with_clock(Arc::new(clock.clone()));
    (store, clock, queue)
}

async fn stored_record(store: &MemoryDocumentStore, id: &EntryId) -> LeaseRecord {
    let document = store.read(id, QUEUE_PARTITION).await.unwrap();
    serde_json::from_value(document.body).unwrap()
}

/// Memory store that yields to the scheduler before every patch, so
/// concurrent claims interleave between their query and their write
#[derive(Clone, Default)]
struct YieldingStore {
    inner: MemoryDocumentStore,
    patches: Arc<AtomicUsize>,
}

#[async_trait]
impl DocumentStore for YieldingStore {
    async fn create(&self, partition: &str, body: serde_json::Value) -> QueueResult<Document> {
        self.inner.create(partition, body).await
    }

    async fn read(&self, id: &EntryId, partition: &str) -> QueueResult<Document> {
        self.inner.read(id, partition).await
    }

    async fn patch(
        &self,
        id: &EntryId,
        partition: &str,
        operations: &[PatchOperation],
        condition: WriteCondition,
    ) -> QueueResult<Document> {
        tokio::task::yield_now().await;
        self.patches.fetch_add(1, Ordering::SeqCst);
        self.inner.patch(id, partition, operations, condition).await
    }

    async fn delete(&self, id: &EntryId, partition: &str, condition: WriteCondition) -> QueueResult<()> {
        self.inner.delete(id, partition, condition).await
    }

    fn query(&self, partition: &str, query: &DocumentQuery) -> BoxStream<QueueResult<serde_json::Value>> {
        self.inner.query(partition, query)
    }
}

async fn receive_next_event(stream: &mut BoxStream<QueueEvent>) -> QueueEvent {
    tokio::time::timeout(Duration::from_secs(1), stream.next())
        .await
        .expect("Timeout waiting for event")
        .expect("Stream ended")
}

/// A1. Fetch leases atomically
#[tokio::test]
async fn test_fetch_leases_atomically() {
    let store = YieldingStore::default();
    let queue = JobQueue::new(store.clone());
    queue.enqueue("default", "1").await.unwrap();

    // Both workers read the entry as available before either writes
    let (a, b) = tokio::join!(queue.try_fetch(&["default"]), queue.try_fetch(&["default"]));
    let mut winners: Vec<_> = [a.unwrap(), b.unwrap()].into_iter().flatten().collect();

    assert_eq!(store.patches.load(Ordering::SeqCst), 2, "both workers must attempt the claim");
    assert_eq!(winners.len(), 1);
    let mut job = winners.pop().unwrap();
    assert_eq!(queue.monitor().get_fetched_count("default").await.unwrap(), 1);
    job.dispose().await;
}

/// A2. Remove is terminal
#[tokio::test]
async fn test_remove_then_requeue_does_not_recreate() {
    let (store, _clock, queue) = create_test_queue();
    queue.enqueue("default", "1").await.unwrap();
    let mut job = queue.try_fetch(&["default"]).await.unwrap().unwrap();

    assert_eq!(job.remove_from_queue().await, WriteOutcome::Applied);
    assert_eq!(job.requeue().await.unwrap(), WriteOutcome::AlreadyResolved);
    assert_eq!(job.keep_alive().await, WriteOutcome::AlreadyResolved);
    assert_eq!(job.dispose().await, WriteOutcome::AlreadyResolved);

    assert!(store.is_empty(QUEUE_PARTITION));
}

/// A3. Requeue is terminal and resets FIFO position
#[tokio::test]
async fn test_requeue_resets_created_on() {
    let (store, clock, queue) = create_test_queue();
    let id = queue.enqueue("default", "1").await.unwrap();
    let created = stored_record(&store, &id).await.created_on;

    clock.advance(ChronoDuration::seconds(10));
    let mut job = queue.try_fetch(&["default"]).await.unwrap().unwrap();
    clock.advance(ChronoDuration::seconds(10));

    assert_eq!(job.requeue().await.unwrap(), WriteOutcome::Applied);
    assert_eq!(job.remove_from_queue().await, WriteOutcome::AlreadyResolved);
    job.dispose().await;

    let record = stored_record(&store, &id).await;
    assert!(record.is_available());
    assert_eq!(record.created_on, created + 20_000);
    assert_eq!(record.job_id, JobId::from("1"));
}

/// A4. Renewal touches only fetched_at
#[tokio::test]
async fn test_renewal_only_moves_fetched_at() {
    let (store, clock, queue) = create_test_queue();
    let id = queue.enqueue("default", "1").await.unwrap();
    let mut job = queue.try_fetch(&["default"]).await.unwrap().unwrap();
    let before = stored_record(&store, &id).await;

    clock.advance(ChronoDuration::seconds(15));
    assert_eq!(job.keep_alive().await, WriteOutcome::Applied);
    let after = stored_record(&store, &id).await;

    assert_eq!(after.fetched_at, before.fetched_at.map(|t| t + 15_000));
    assert_eq!(after.created_on, before.created_on);
    assert_eq!(after.job_id, before.job_id);
    assert_eq!(after.name, before.name);
    assert_ne!(after.version_token, before.version_token);
    job.dispose().await;
}

/// A5. Requeue of an entry deleted behind the handle's back is forgiven
#[tokio::test]
async fn test_requeue_after_external_delete_is_forgiven() {
    let (store, _clock, queue) = create_test_queue();
    let id = queue.enqueue("default", "1").await.unwrap();
    let mut job = queue.try_fetch(&["default"]).await.unwrap().unwrap();

    store
        .delete(&id, QUEUE_PARTITION, dog_lease::WriteCondition::Always)
        .await
        .unwrap();

    assert_eq!(job.requeue().await.unwrap(), WriteOutcome::AlreadyResolved);
    assert!(job.is_resolved().await);
    job.dispose().await;
}

/// A6. Requeue against a newer version surfaces the conflict
#[tokio::test]
async fn test_requeue_conflict_propagates() {
    let (_store, clock, queue) = create_test_queue();
    queue.enqueue("default", "1").await.unwrap();
    let mut stale = queue.try_fetch(&["default"]).await.unwrap().unwrap();

    clock.advance(ChronoDuration::seconds(301));
    let mut owner = queue.try_fetch(&["default"]).await.unwrap().unwrap();

    let result = stale.requeue().await;
    assert!(matches!(result, Err(QueueError::VersionConflict { .. })));
    // Still terminal: no second attempt from dispose
    assert_eq!(stale.dispose().await, WriteOutcome::AlreadyResolved);

    assert_eq!(owner.remove_from_queue().await, WriteOutcome::Applied);
    owner.dispose().await;
}

/// A7. Dispose releases exactly once
#[tokio::test]
async fn test_dispose_twice_releases_once() {
    let (_store, _clock, queue) = create_test_queue();
    queue.enqueue("default", "1").await.unwrap();
    let mut job = queue.try_fetch(&["default"]).await.unwrap().unwrap();

    assert_eq!(job.dispose().await, WriteOutcome::Applied);
    assert_eq!(job.dispose().await, WriteOutcome::AlreadyResolved);
    assert_eq!(queue.observability().metrics().snapshot().requeued, 1);
    assert_eq!(queue.monitor().get_enqueued_count("default").await.unwrap(), 1);
}

/// B1. Keep-alive timer holds the lease through a long job
#[tokio::test(start_paused = true)]
async fn test_end_to_end_with_keep_alive() {
    let (store, clock, queue) = create_test_queue();
    let queue = queue
        .with_config(
            QueueConfig::default()
                .with_keep_alive_interval(Duration::from_secs(15))
                .with_invisibility_timeout(Duration::from_secs(60)),
        )
        .unwrap();
    let mut events = queue.event_stream();

    let entry = queue.enqueue("default", "long-job").await.unwrap();
    assert!(matches!(receive_next_event(&mut events).await, QueueEvent::Enqueued { .. }));

    let mut job = queue.fetch(&["default"], &CancellationToken::new()).await.unwrap();
    assert_eq!(job.entry_id(), entry);
    assert!(matches!(receive_next_event(&mut events).await, QueueEvent::Fetched { .. }));

    let mut last = stored_record(&store, &entry).await.fetched_at.unwrap();
    for _ in 0..3 {
        clock.advance(ChronoDuration::seconds(15));
        tokio::time::sleep(Duration::from_secs(15)).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        let fetched_at = stored_record(&store, &entry).await.fetched_at.unwrap();
        assert_eq!(fetched_at, last + 15_000, "keep-alive must move fetched_at forward");
        last = fetched_at;
    }
    assert_eq!(queue.observability().metrics().snapshot().renewed, 3);

    assert_eq!(job.remove_from_queue().await, WriteOutcome::Applied);
    job.dispose().await;
    assert!(store.is_empty(QUEUE_PARTITION));

    let mut saw_removed = false;
    while let Ok(Some(event)) = tokio::time::timeout(Duration::from_millis(10), events.next()).await {
        if matches!(event, QueueEvent::Removed { .. }) {
            saw_removed = true;
        }
    }
    assert!(saw_removed);
}

/// B2. A requeued job is counted as waiting again
#[tokio::test(start_paused = true)]
async fn test_end_to_end_requeue_is_counted_as_enqueued() {
    let (_store, _clock, queue) = create_test_queue();
    queue.enqueue("default", "retry-me").await.unwrap();
    let monitor = queue.monitor();

    let mut job = queue.fetch(&["default"], &CancellationToken::new()).await.unwrap();
    tokio::time::sleep(Duration::from_secs(16)).await;
    assert!(queue.observability().metrics().snapshot().renewed >= 1);
    assert_eq!(monitor.get_fetched_count("default").await.unwrap(), 1);

    assert_eq!(job.requeue().await.unwrap(), WriteOutcome::Applied);
    job.dispose().await;

    let counts = monitor.get_enqueued_and_fetched_count("default").await.unwrap();
    assert_eq!((counts.enqueued, counts.fetched), (1, 0));
    assert_eq!(monitor.get_enqueued_job_ids("default", 0, 10).await.unwrap(), vec![JobId::from("retry-me")]);
}

/// B3. A failed delete is logged and never surfaces as an error
#[tokio::test]
#[tracing_test::traced_test]
async fn test_remove_failure_is_logged_not_raised() {
    let (store, _clock, queue) = create_test_queue();
    let queue = queue
        .with_config(QueueConfig::default().with_retry(dog_lease::RetryPolicy::none()))
        .unwrap();
    queue.enqueue("default", "1").await.unwrap();
    let mut job = queue.try_fetch(&["default"]).await.unwrap().unwrap();

    store.fail_next(QueueError::Unavailable("store offline".to_string()));
    let outcome = job.remove_from_queue().await;

    assert!(matches!(outcome, WriteOutcome::Failed(QueueError::Unavailable(_))));
    assert!(logs_contain("Unable to remove the job"));
    assert_eq!(job.dispose().await, WriteOutcome::AlreadyResolved);
    assert_eq!(queue.observability().metrics().snapshot().remove_failures, 1);
}

/// B4. Dropped handles hand their entry back
#[tokio::test]
async fn test_dropped_worker_releases_entry() {
    let (_store, _clock, queue) = create_test_queue();
    queue.enqueue("default", "1").await.unwrap();

    {
        let _job = queue.try_fetch(&["default"]).await.unwrap().unwrap();
    }

    let cancel = CancellationToken::new();
    let mut again = tokio::time::timeout(Duration::from_secs(5), queue.fetch(&["default"], &cancel))
        .await
        .expect("entry was not released")
        .unwrap();
    assert_eq!(again.job_id(), JobId::from("1"));
    again.dispose().await;
}

#[derive(Debug, Clone)]
enum Step {
    Enqueue(u8),
    Fetch(u8),
    Remove,
    Requeue,
}

fn step_strategy() -> impl Strategy<Value = Step> {
    prop_oneof![
        (0u8..3).prop_map(Step::Enqueue),
        (0u8..3).prop_map(Step::Fetch),
        Just(Step::Remove),
        Just(Step::Requeue),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// C1. Monitoring counts always agree with the stored entries
    #[test]
    fn prop_counts_match_operations(steps in prop::collection::vec(step_strategy(), 1..40)) {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        runtime.block_on(async move {
            let (store, _clock, queue) = create_test_queue();
            let names = ["a", "b", "c"];
            let mut held = Vec::new();
            let mut expected_total = [0usize; 3];
            let mut expected_fetched = [0usize; 3];

            for (n, step) in steps.into_iter().enumerate() {
                match step {
                    Step::Enqueue(q) => {
                        queue.enqueue(names[q as usize], format!("job-{}", n)).await.unwrap();
                        expected_total[q as usize] += 1;
                    }
                    Step::Fetch(q) => {
                        if let Some(job) = queue.try_fetch(&[names[q as usize]]).await.unwrap() {
                            expected_fetched[q as usize] += 1;
                            held.push((q as usize, job));
                        }
                    }
                    Step::Remove => {
                        if let Some((q, mut job)) = held.pop() {
                            assert_eq!(job.remove_from_queue().await, WriteOutcome::Applied);
                            job.dispose().await;
                            expected_total[q] -= 1;
                            expected_fetched[q] -= 1;
                        }
                    }
                    Step::Requeue => {
                        if let Some((q, mut job)) = held.pop() {
                            assert_eq!(job.requeue().await.unwrap(), WriteOutcome::Applied);
                            job.dispose().await;
                            expected_fetched[q] -= 1;
                        }
                    }
                }
            }

            let monitor = queue.monitor();
            for (i, name) in names.iter().enumerate() {
                let counts = monitor.get_enqueued_and_fetched_count(name).await.unwrap();
                assert_eq!(counts.fetched, expected_fetched[i]);
                assert_eq!(counts.total(), expected_total[i]);
            }
            assert_eq!(store.len(QUEUE_PARTITION), expected_total.iter().sum::<usize>());

            for (_, mut job) in held {
                job.dispose().await;
            }
        });
    }
}
