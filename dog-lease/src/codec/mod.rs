pub mod json;

use serde_json::Value;

use crate::{QueueResult, store::Document, types::LeaseRecord};

/// Converts lease records to and from store documents
pub trait DocumentCodec: Send + Sync {
    /// Body to send on create. Never carries the etag.
    fn encode_record(&self, record: &LeaseRecord) -> QueueResult<Value>;

    /// Typed record from a stored document; the version comes from the document
    fn decode_document(&self, document: Document) -> QueueResult<LeaseRecord>;

    /// Typed record from a raw query result (the body carries `_etag`)
    fn decode_value(&self, value: Value) -> QueueResult<LeaseRecord>;
}
