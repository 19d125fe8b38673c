//! Read-only queue statistics for dashboards and the scheduler's monitoring API.
//!
//! Nothing here writes to the store. The distinct queue-name list is cached
//! for `queues_cache_ttl` because dashboards poll it constantly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use crate::{
    QueueError, QueueResult,
    queue::LeaseContext,
    store::DocumentStore,
    types::{fields, DocumentQuery, Filter, JobId, Projection},
};

/// Both counters of one queue. Taken by two separate queries, so they may
/// not describe a single instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnqueuedAndFetchedCount {
    pub enqueued: usize,
    pub fetched: usize,
}

impl EnqueuedAndFetchedCount {
    pub fn total(&self) -> usize {
        self.enqueued + self.fetched
    }
}

#[derive(Debug, Clone, Copy)]
enum EntryState {
    Enqueued,
    Fetched,
}

impl EntryState {
    fn filter(self) -> Filter {
        let state = match self {
            Self::Enqueued => Filter::is_unset(fields::FETCHED_AT),
            Self::Fetched => Filter::is_set(fields::FETCHED_AT),
        };
        Filter::All(vec![Filter::eq(fields::NAME, "@name"), state])
    }
}

#[derive(Debug, Default)]
struct QueuesCache {
    names: Vec<String>,
    updated_at: Option<DateTime<Utc>>,
}

pub struct QueueMonitor<S: DocumentStore + ?Sized> {
    ctx: LeaseContext<S>,
    cache: Mutex<QueuesCache>,
}

impl<S: DocumentStore + ?Sized> QueueMonitor<S> {
    pub(crate) fn new(ctx: LeaseContext<S>) -> Self {
        Self {
            ctx,
            cache: Mutex::new(QueuesCache::default()),
        }
    }

    /// Distinct queue names that currently hold entries
    pub async fn get_queues(&self) -> QueueResult<Vec<String>> {
        let mut cache = self.cache.lock().await;
        let now = self.ctx.clock.now();
        let ttl = chrono::Duration::from_std(self.ctx.config.queues_cache_ttl)
            .map_err(|e| QueueError::invalid(format!("queues_cache_ttl out of range: {}", e)))?;

        // An empty list is never served from cache
        if let Some(updated_at) = cache.updated_at {
            if !cache.names.is_empty() && updated_at + ttl >= now {
                return Ok(cache.names.clone());
            }
        }

        let query = DocumentQuery::select(Projection::DistinctValue(fields::NAME.to_string()));
        let names: Vec<String> = self
            .ctx
            .run_query(&query)
            .await?
            .into_iter()
            .filter_map(|value| value.as_str().map(str::to_string))
            .collect();

        debug!("Refreshed queue list: {} queues", names.len());
        cache.names.clear();
        cache.names.extend(names);
        cache.updated_at = Some(now);

        Ok(cache.names.clone())
    }

    /// Entries of `queue` waiting to be fetched
    pub async fn get_enqueued_count(&self, queue: &str) -> QueueResult<usize> {
        self.count(queue, EntryState::Enqueued).await
    }

    /// Entries of `queue` currently leased
    pub async fn get_fetched_count(&self, queue: &str) -> QueueResult<usize> {
        self.count(queue, EntryState::Fetched).await
    }

    pub async fn get_enqueued_and_fetched_count(&self, queue: &str) -> QueueResult<EnqueuedAndFetchedCount> {
        let enqueued = self.count(queue, EntryState::Enqueued).await?;
        let fetched = self.count(queue, EntryState::Fetched).await?;
        Ok(EnqueuedAndFetchedCount { enqueued, fetched })
    }

    /// Page of waiting job ids, oldest first
    pub async fn get_enqueued_job_ids(&self, queue: &str, from: usize, per_page: usize) -> QueueResult<Vec<JobId>> {
        self.job_ids(queue, EntryState::Enqueued, from, per_page).await
    }

    /// Page of leased job ids, oldest first
    pub async fn get_fetched_job_ids(&self, queue: &str, from: usize, per_page: usize) -> QueueResult<Vec<JobId>> {
        self.job_ids(queue, EntryState::Fetched, from, per_page).await
    }

    async fn count(&self, queue: &str, state: EntryState) -> QueueResult<usize> {
        let query = DocumentQuery::select(Projection::Count)
            .filter(state.filter())
            .with_parameter("@name", queue);

        let count = self
            .ctx
            .run_query(&query)
            .await?
            .first()
            .and_then(Value::as_u64)
            .unwrap_or(0);
        Ok(count as usize)
    }

    async fn job_ids(&self, queue: &str, state: EntryState, from: usize, per_page: usize) -> QueueResult<Vec<JobId>> {
        let query = DocumentQuery::select(Projection::Value(fields::JOB_ID.to_string()))
            .filter(state.filter())
            .order_by(fields::CREATED_ON)
            .page(from, per_page)
            .with_parameter("@name", queue);

        self.ctx
            .run_query(&query)
            .await?
            .into_iter()
            .map(|value| serde_json::from_value(value).map_err(QueueError::from))
            .collect()
    }
}
