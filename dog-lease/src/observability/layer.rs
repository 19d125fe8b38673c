use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio_stream::{wrappers::BroadcastStream, StreamExt};
use tracing::trace;

use crate::{
    store::BoxStream,
    types::{LeaseRecord, QueueEvent},
};
use super::LeaseMetrics;

/// Event broadcaster plus counters, shared by the queue, its fetched jobs
/// and the reaper
#[derive(Clone)]
pub struct ObservabilityLayer {
    event_broadcaster: broadcast::Sender<QueueEvent>,
    metrics: Arc<LeaseMetrics>,
}

impl ObservabilityLayer {
    pub fn new() -> Self {
        let (event_broadcaster, _) = broadcast::channel(1000);

        Self {
            event_broadcaster,
            metrics: Arc::new(LeaseMetrics::new()),
        }
    }

    pub fn metrics(&self) -> &LeaseMetrics {
        &self.metrics
    }

    /// Subscribe to lifecycle events; lagging subscribers skip missed events
    pub fn event_stream(&self) -> BoxStream<QueueEvent> {
        let stream = BroadcastStream::new(self.event_broadcaster.subscribe())
            .filter_map(|result| result.ok());
        Box::pin(stream)
    }

    fn emit(&self, event: QueueEvent) {
        trace!("queue event: {}", event.event_name());
        // No subscribers is fine
        let _ = self.event_broadcaster.send(event);
    }

    pub fn record_enqueued(&self, record: &LeaseRecord, at: DateTime<Utc>) {
        self.metrics.increment_enqueued();
        self.emit(QueueEvent::Enqueued {
            entry_id: record.id.clone(),
            job_id: record.job_id.clone(),
            queue: record.name.clone(),
            at,
        });
    }

    pub fn record_fetched(&self, record: &LeaseRecord, at: DateTime<Utc>) {
        self.metrics.increment_fetched();
        self.emit(QueueEvent::Fetched {
            entry_id: record.id.clone(),
            job_id: record.job_id.clone(),
            queue: record.name.clone(),
            at,
        });
    }

    pub fn record_renewed(&self, record: &LeaseRecord, at: DateTime<Utc>) {
        self.metrics.increment_renewed();
        self.emit(QueueEvent::Renewed { entry_id: record.id.clone(), at });
    }

    pub fn record_renewal_failed(&self) {
        self.metrics.increment_renewal_failures();
    }

    pub fn record_requeued(&self, record: &LeaseRecord, at: DateTime<Utc>) {
        self.metrics.increment_requeued();
        self.emit(QueueEvent::Requeued {
            entry_id: record.id.clone(),
            job_id: record.job_id.clone(),
            at,
        });
    }

    pub fn record_removed(&self, record: &LeaseRecord, at: DateTime<Utc>) {
        self.metrics.increment_removed();
        self.emit(QueueEvent::Removed {
            entry_id: record.id.clone(),
            job_id: record.job_id.clone(),
            at,
        });
    }

    pub fn record_remove_failed(&self) {
        self.metrics.increment_remove_failures();
    }

    pub fn record_reaped(&self, record: &LeaseRecord, at: DateTime<Utc>) {
        self.metrics.increment_reaped();
        self.emit(QueueEvent::Reaped {
            entry_id: record.id.clone(),
            job_id: record.job_id.clone(),
            at,
        });
    }
}

impl Default for ObservabilityLayer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::JobId;
    use std::time::Duration;

    #[tokio::test]
    async fn events_reach_subscribers() {
        let layer = ObservabilityLayer::new();
        let mut events = layer.event_stream();
        let record = LeaseRecord::new(JobId::from("1"), "default", Utc::now());

        layer.record_enqueued(&record, Utc::now());

        let event = tokio::time::timeout(Duration::from_secs(1), events.next())
            .await
            .expect("Timeout waiting for event")
            .expect("Stream ended");
        assert_eq!(event.event_name(), "enqueued");
        assert_eq!(event.entry_id(), &record.id);
        assert_eq!(layer.metrics().snapshot().enqueued, 1);
    }
}
