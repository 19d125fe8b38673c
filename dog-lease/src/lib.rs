//! # dog-lease: Lease-based job queue on a document store
//!
//! Queue entries live as small JSON documents in one partition of a document
//! store. Workers claim an entry by writing `fetched_at` under an etag
//! precondition, keep the claim alive in the background, and finally either
//! delete the entry or put it back.
//!
//! ## Guarantees
//!
//! - **Conditional transitions**: every claim, renewal, release and removal is
//!   an `If-Match` write, so a worker that lost its lease can never clobber
//!   the entry's new owner
//! - **At-most-once resolution**: a handle removes or requeues its entry once;
//!   later calls report [`WriteOutcome::AlreadyResolved`]
//! - **Crash recovery**: leases whose keep-alive stopped for longer than the
//!   invisibility timeout become claimable again
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dog_lease::prelude::*;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> QueueResult<()> {
//! let queue = JobQueue::new(MemoryDocumentStore::new());
//! queue.enqueue("default", "job-42").await?;
//!
//! let mut job = queue.fetch(&["default"], &CancellationToken::new()).await?;
//! // ... perform the job while the lease is kept alive ...
//! job.remove_from_queue().await;
//! job.dispose().await;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod types;
pub mod clock;
pub mod config;
pub mod retry;
pub mod store;
pub mod codec;
pub mod observability;
pub mod queue;
pub mod fetched;
pub mod monitoring;
pub mod reaper;

// Core API exports
pub use error::{QueueError, QueueResult, WriteOutcome};
pub use config::QueueConfig;
pub use retry::RetryPolicy;
pub use queue::JobQueue;
pub use fetched::FetchedJob;
pub use monitoring::{EnqueuedAndFetchedCount, QueueMonitor};
pub use reaper::LeaseReaper;
pub use clock::{Clock, ManualClock, SystemClock};
pub use types::{
    DocumentQuery, EntryId, Filter, JobId, LeaseRecord, PatchOperation, Projection,
    QueueEvent, VersionToken, WriteCondition,
};

// Storage and codecs
pub use store::{Document, DocumentStore};
pub use codec::{DocumentCodec, json::JsonDocumentCodec};

#[cfg(feature = "memory")]
pub use store::memory::MemoryDocumentStore;

// Observability exports
pub use observability::{LeaseMetrics, MetricsSnapshot, ObservabilityLayer};

#[cfg(feature = "tracing-basic")]
pub use observability::init_tracing;

/// Everything a producer or worker usually needs
pub mod prelude {
    pub use crate::{
        JobQueue, FetchedJob, QueueMonitor, LeaseReaper
    };

    pub use crate::{
        EntryId, JobId, QueueConfig, QueueError, QueueResult, WriteOutcome
    };

    pub use crate::{DocumentStore, ObservabilityLayer};

    #[cfg(feature = "memory")]
    pub use crate::MemoryDocumentStore;

    pub use async_trait::async_trait;
}
