//! Worker-side handle on a leased queue entry.
//!
//! A [`FetchedJob`] owns a background keep-alive task that refreshes
//! `fetched_at` every `keep_alive_interval` so the lease is not treated as
//! abandoned. The holder resolves the lease with [`FetchedJob::remove_from_queue`]
//! (job done) or [`FetchedJob::requeue`] (give it back). If neither happens,
//! [`FetchedJob::dispose`] (or dropping the handle) requeues the entry.
//!
//! All store writes of one handle run under a single async mutex, so at most
//! one of them is in flight and the terminal flags are checked and set
//! atomically with the write they guard.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use crate::{
    QueueError, QueueResult, WriteOutcome,
    queue::LeaseContext,
    store::DocumentStore,
    types::{fields, record::to_epoch_millis, EntryId, JobId, LeaseRecord, PatchOperation},
};

#[derive(Debug, Default)]
struct LeaseState {
    removed: bool,
    requeued: bool,
}

impl LeaseState {
    fn is_terminal(&self) -> bool {
        self.removed || self.requeued
    }
}

struct LeaseInner<S: DocumentStore + ?Sized> {
    ctx: LeaseContext<S>,
    /// Latest record returned by the store; swapped after every successful write
    record: RwLock<Arc<LeaseRecord>>,
    state: Mutex<LeaseState>,
}

impl<S: DocumentStore + ?Sized> LeaseInner<S> {
    fn snapshot(&self) -> Arc<LeaseRecord> {
        self.record.read().clone()
    }

    fn replace(&self, record: LeaseRecord) -> Arc<LeaseRecord> {
        let record = Arc::new(record);
        *self.record.write() = record.clone();
        record
    }

    async fn keep_alive(&self) -> WriteOutcome {
        let state = self.state.lock().await;
        if state.is_terminal() {
            return WriteOutcome::AlreadyResolved;
        }

        let current = self.snapshot();
        let now = self.ctx.clock.now();
        let operations = [PatchOperation::set(
            PatchOperation::field_path(fields::FETCHED_AT),
            to_epoch_millis(now),
        )];

        let outcome = match self.ctx.patch_record(&current, &operations, "keep-alive").await {
            Ok(updated) => {
                let updated = self.replace(updated);
                self.ctx.observability.record_renewed(&updated, now);
                trace!("Keep-alive query for entry [{}] sent", updated.id);
                WriteOutcome::Applied
            }
            Err(e) => {
                self.ctx.observability.record_renewal_failed();
                debug!("Unable to execute keep-alive query for entry [{}]: {}", current.id, e);
                WriteOutcome::from_error(e)
            }
        };

        drop(state);
        outcome
    }

    async fn requeue_locked(&self, state: &mut LeaseState) -> QueueResult<WriteOutcome> {
        if state.is_terminal() {
            return Ok(WriteOutcome::AlreadyResolved);
        }

        let current = self.snapshot();
        let now = self.ctx.clock.now();
        let operations = [
            PatchOperation::remove(PatchOperation::field_path(fields::FETCHED_AT)),
            PatchOperation::set(PatchOperation::field_path(fields::CREATED_ON), to_epoch_millis(now)),
        ];

        let result = self.ctx.patch_record(&current, &operations, "requeue").await;
        // Released at most once, whatever the store said
        state.requeued = true;

        match result {
            Ok(updated) => {
                let updated = self.replace(updated);
                self.ctx.observability.record_requeued(&updated, now);
                debug!("Job [{}] requeued to [{}]", updated.job_id, updated.name);
                Ok(WriteOutcome::Applied)
            }
            Err(QueueError::NotFound { .. }) => {
                debug!("Entry [{}] was already removed; nothing to requeue", current.id);
                Ok(WriteOutcome::AlreadyResolved)
            }
            Err(e) => {
                warn!("Unable to requeue job [{}] to [{}]: {}", current.job_id, current.name, e);
                Err(e)
            }
        }
    }

    async fn remove_locked(&self, state: &mut LeaseState) -> WriteOutcome {
        if state.is_terminal() {
            return WriteOutcome::AlreadyResolved;
        }

        let current = self.snapshot();
        let result = self.ctx.delete_record(&current).await;
        state.removed = true;

        match result {
            Ok(()) => {
                self.ctx.observability.record_removed(&current, self.ctx.clock.now());
                debug!("Job [{}] removed from queue [{}]", current.job_id, current.name);
                WriteOutcome::Applied
            }
            Err(e) => {
                self.ctx.observability.record_remove_failed();
                error!("Unable to remove the job [{}] from the queue [{}]: {}", current.job_id, current.name, e);
                WriteOutcome::from_error(e)
            }
        }
    }

    async fn release_if_unresolved(&self) -> WriteOutcome {
        let mut state = self.state.lock().await;
        if state.is_terminal() {
            return WriteOutcome::AlreadyResolved;
        }
        match self.requeue_locked(&mut state).await {
            Ok(outcome) => outcome,
            Err(e) => WriteOutcome::from_error(e),
        }
    }
}

/// Background keep-alive task of one handle
struct KeepAlive {
    shutdown_tx: oneshot::Sender<()>,
    join_handle: JoinHandle<()>,
}

impl KeepAlive {
    /// Signal the task and wait until any in-flight round has finished
    async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.join_handle.await {
            warn!("Keep-alive task ended abnormally: {}", e);
        }
    }
}

/// Exclusive, time-bounded claim on one queue entry
pub struct FetchedJob<S: DocumentStore + ?Sized + 'static> {
    inner: Arc<LeaseInner<S>>,
    keep_alive: Option<KeepAlive>,
    /// Set once the dispose-time release has completed
    released: bool,
}

impl<S: DocumentStore + ?Sized + 'static> FetchedJob<S> {
    /// Wrap a freshly claimed record and start its keep-alive task.
    /// Must be called from within a tokio runtime.
    pub(crate) fn new(ctx: LeaseContext<S>, record: LeaseRecord) -> Self {
        let interval = ctx.config.keep_alive_interval;
        let inner = Arc::new(LeaseInner {
            ctx,
            record: RwLock::new(Arc::new(record)),
            state: Mutex::new(LeaseState::default()),
        });

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let task_inner = inner.clone();
        let join_handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        task_inner.keep_alive().await;
                    }
                }
            }
        });

        trace!(
            "Job [{}] will send a keep-alive query every [{:?}]",
            inner.snapshot().job_id,
            interval
        );

        Self {
            inner,
            keep_alive: Some(KeepAlive { shutdown_tx, join_handle }),
            released: false,
        }
    }

    pub fn entry_id(&self) -> EntryId {
        self.inner.snapshot().id.clone()
    }

    /// Queue name
    pub fn queue(&self) -> String {
        self.inner.snapshot().name.clone()
    }

    pub fn job_id(&self) -> JobId {
        self.inner.snapshot().job_id.clone()
    }

    /// Last keep-alive time as seen by this handle
    pub fn fetched_at(&self) -> Option<DateTime<Utc>> {
        self.inner.snapshot().fetched_at_utc()
    }

    /// Current immutable snapshot of the record
    pub fn record(&self) -> Arc<LeaseRecord> {
        self.inner.snapshot()
    }

    /// Whether the lease was removed or requeued through this handle
    pub async fn is_resolved(&self) -> bool {
        self.inner.state.lock().await.is_terminal()
    }

    /// Run one keep-alive round now. Failures are logged and reported, never raised.
    pub async fn keep_alive(&self) -> WriteOutcome {
        self.inner.keep_alive().await
    }

    /// Delete the entry after successful processing.
    ///
    /// Best effort: failures are logged and reported in the outcome. The
    /// handle is resolved afterwards either way.
    pub async fn remove_from_queue(&self) -> WriteOutcome {
        let mut state = self.inner.state.lock().await;
        self.inner.remove_locked(&mut state).await
    }

    /// Release the entry back to its queue.
    ///
    /// A concurrently deleted entry yields `AlreadyResolved`. Other failures
    /// are returned as errors, but the handle is resolved in every case and
    /// never retries the release.
    pub async fn requeue(&self) -> QueueResult<WriteOutcome> {
        let mut state = self.inner.state.lock().await;
        self.inner.requeue_locked(&mut state).await
    }

    /// Stop the keep-alive task and requeue the entry if it is still unresolved.
    ///
    /// Idempotent: once a call completes, later calls do nothing. If the
    /// returned future is dropped before completion, dropping the handle still
    /// releases the entry.
    pub async fn dispose(&mut self) -> WriteOutcome {
        if self.released {
            return WriteOutcome::AlreadyResolved;
        }

        if let Some(keep_alive) = self.keep_alive.take() {
            keep_alive.stop().await;
        }

        let outcome = self.inner.release_if_unresolved().await;
        self.released = true;
        outcome
    }
}

impl<S: DocumentStore + ?Sized + 'static> Drop for FetchedJob<S> {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let keep_alive = self.keep_alive.take();
        let inner = self.inner.clone();

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                info!("Fetched job [{}] dropped without dispose; releasing it", inner.snapshot().job_id);
                handle.spawn(async move {
                    if let Some(keep_alive) = keep_alive {
                        keep_alive.stop().await;
                    }
                    inner.release_if_unresolved().await;
                });
            }
            Err(_) => {
                if let Some(keep_alive) = keep_alive {
                    let _ = keep_alive.shutdown_tx.send(());
                }
                warn!(
                    "Fetched job [{}] dropped outside a tokio runtime; lease left to expire",
                    inner.snapshot().job_id
                );
            }
        }
    }
}
