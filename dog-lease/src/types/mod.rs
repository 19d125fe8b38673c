pub mod ids;
pub mod record;
pub mod patch;
pub mod query;
pub mod events;

pub use ids::{EntryId, JobId, VersionToken};
pub use record::{fields, DocumentType, LeaseRecord, QUEUE_PARTITION};
pub use patch::{PatchOperation, WriteCondition};
pub use query::{DocumentQuery, Filter, Projection};
pub use events::QueueEvent;
