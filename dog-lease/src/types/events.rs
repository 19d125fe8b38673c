use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{EntryId, JobId};

/// Lease lifecycle events for structured observability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueueEvent {
    /// Entry was created in a queue
    Enqueued {
        entry_id: EntryId,
        job_id: JobId,
        queue: String,
        at: DateTime<Utc>,
    },

    /// Entry was leased by a worker
    Fetched {
        entry_id: EntryId,
        job_id: JobId,
        queue: String,
        at: DateTime<Utc>,
    },

    /// Keep-alive refreshed `fetched_at`
    Renewed {
        entry_id: EntryId,
        at: DateTime<Utc>,
    },

    /// Entry was released back to its queue
    Requeued {
        entry_id: EntryId,
        job_id: JobId,
        at: DateTime<Utc>,
    },

    /// Entry was deleted after processing
    Removed {
        entry_id: EntryId,
        job_id: JobId,
        at: DateTime<Utc>,
    },

    /// Abandoned lease was released by the reaper
    Reaped {
        entry_id: EntryId,
        job_id: JobId,
        at: DateTime<Utc>,
    },
}

impl QueueEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Enqueued { .. } => "enqueued",
            Self::Fetched { .. } => "fetched",
            Self::Renewed { .. } => "renewed",
            Self::Requeued { .. } => "requeued",
            Self::Removed { .. } => "removed",
            Self::Reaped { .. } => "reaped",
        }
    }

    pub fn entry_id(&self) -> &EntryId {
        match self {
            Self::Enqueued { entry_id, .. }
            | Self::Fetched { entry_id, .. }
            | Self::Renewed { entry_id, .. }
            | Self::Requeued { entry_id, .. }
            | Self::Removed { entry_id, .. }
            | Self::Reaped { entry_id, .. } => entry_id,
        }
    }

    pub fn timestamp(&self) -> &DateTime<Utc> {
        match self {
            Self::Enqueued { at, .. }
            | Self::Fetched { at, .. }
            | Self::Renewed { at, .. }
            | Self::Requeued { at, .. }
            | Self::Removed { at, .. }
            | Self::Reaped { at, .. } => at,
        }
    }
}
