use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::{EntryId, JobId, VersionToken};

/// Partition key shared by every queue entry document
pub const QUEUE_PARTITION: &str = "queue";

/// Document field names used in patches and queries
pub mod fields {
    pub const ID: &str = "id";
    pub const JOB_ID: &str = "job_id";
    pub const NAME: &str = "name";
    pub const CREATED_ON: &str = "created_on";
    pub const FETCHED_AT: &str = "fetched_at";
    pub const ETAG: &str = "_etag";
    pub const TYPE: &str = "type";
}

/// Kind of document stored in the container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Queue,
}

/// Queue entry document.
///
/// An entry is *available* while `fetched_at` is absent (or `null`) and
/// *leased* otherwise, in which case `fetched_at` is the last keep-alive.
/// Timestamps are epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRecord {
    pub id: EntryId,

    pub job_id: JobId,

    /// Queue name
    pub name: String,

    /// When the entry last became available (FIFO key)
    pub created_on: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetched_at: Option<i64>,

    #[serde(rename = "type")]
    pub document_type: DocumentType,

    /// Assigned by the store on every write, never sent by the client
    #[serde(rename = "_etag", default, skip_serializing)]
    pub version_token: VersionToken,
}

impl LeaseRecord {
    /// Create a new available entry
    pub fn new(job_id: JobId, queue: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: EntryId::new(),
            job_id,
            name: queue.into(),
            created_on: to_epoch_millis(now),
            fetched_at: None,
            document_type: DocumentType::Queue,
            version_token: VersionToken::default(),
        }
    }

    pub fn is_available(&self) -> bool {
        self.fetched_at.is_none()
    }

    pub fn fetched_at_utc(&self) -> Option<DateTime<Utc>> {
        self.fetched_at.and_then(from_epoch_millis)
    }

    /// A leased entry whose last keep-alive is older than `timeout`
    pub fn is_stale(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        match self.fetched_at {
            Some(fetched_at) => fetched_at < to_epoch_millis(now - timeout),
            None => false,
        }
    }
}

pub fn to_epoch_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub fn from_epoch_millis(millis: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
}
