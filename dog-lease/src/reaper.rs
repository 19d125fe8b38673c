use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    QueueResult,
    queue::LeaseContext,
    store::DocumentStore,
    types::{fields, record::to_epoch_millis, DocumentQuery, Filter, PatchOperation, Projection},
};

/// Entries examined per reaper pass
const REAP_BATCH_SIZE: usize = 100;

/// Returns abandoned leases to their queues.
///
/// A lease is abandoned when its `fetched_at` is older than the invisibility
/// timeout. Fetch already treats such entries as available; the reaper makes
/// that visible to monitoring and restores FIFO placement.
pub struct LeaseReaper<S: DocumentStore + ?Sized> {
    ctx: LeaseContext<S>,
}

impl<S: DocumentStore + ?Sized> LeaseReaper<S> {
    pub(crate) fn new(ctx: LeaseContext<S>) -> Self {
        Self { ctx }
    }

    /// Run until `cancel` fires
    pub async fn start(self, cancel: CancellationToken) {
        let mut ticker = interval(self.ctx.config.reaper_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Starting lease reaper with interval: {:?}", self.ctx.config.reaper_interval);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.reap_stale_leases().await {
                Ok(reclaimed) if reclaimed > 0 => info!("Reclaimed {} abandoned leases", reclaimed),
                Ok(_) => debug!("No abandoned leases found"),
                Err(e) => warn!("Error during lease reaping: {}", e),
            }
        }

        info!("Lease reaper stopped");
    }

    /// One reaper pass; returns how many entries were put back
    pub async fn reap_stale_leases(&self) -> QueueResult<usize> {
        let now = self.ctx.clock.now();
        let timeout = self.ctx.invisibility_timeout();
        let stale_before = to_epoch_millis(now - timeout);

        let query = DocumentQuery::select(Projection::Document)
            .filter(Filter::lt(fields::FETCHED_AT, "@timeout"))
            .order_by(fields::FETCHED_AT)
            .page(0, REAP_BATCH_SIZE)
            .with_parameter("@timeout", stale_before);

        let mut reclaimed = 0;
        for value in self.ctx.run_query(&query).await? {
            let stale = self.ctx.codec.decode_value(value)?;
            if !stale.is_stale(now, timeout) {
                continue;
            }
            let operations = [
                PatchOperation::remove(PatchOperation::field_path(fields::FETCHED_AT)),
                PatchOperation::set(PatchOperation::field_path(fields::CREATED_ON), to_epoch_millis(now)),
            ];

            match self.ctx.patch_record(&stale, &operations, "reap").await {
                Ok(record) => {
                    debug!("Reclaimed abandoned lease on job [{}] in [{}]", record.job_id, record.name);
                    self.ctx.observability.record_reaped(&record, now);
                    reclaimed += 1;
                }
                // Renewed, resolved or claimed again since the query ran
                Err(e) if e.is_conflict() || e.is_not_found() => {
                    debug!("Skipping entry [{}]: {}", stale.id, e);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(reclaimed)
    }
}
