use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::{
    QueueError, QueueResult,
    codec::DocumentCodec,
    store::Document,
    types::LeaseRecord,
};

/// serde_json based codec.
///
/// The byte helpers are the wire boundary for stores that talk HTTP: compact
/// output, UTF-8 without BOM, and invalid UTF-8 on input is an error.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDocumentCodec;

impl JsonDocumentCodec {
    pub fn to_bytes<T: Serialize>(&self, value: &T) -> QueueResult<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    pub fn from_bytes<T: DeserializeOwned>(&self, bytes: &[u8]) -> QueueResult<T> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| QueueError::Serialization(format!("invalid UTF-8 payload: {}", e)))?;
        Ok(serde_json::from_str(text)?)
    }
}

impl DocumentCodec for JsonDocumentCodec {
    fn encode_record(&self, record: &LeaseRecord) -> QueueResult<Value> {
        Ok(serde_json::to_value(record)?)
    }

    fn decode_document(&self, document: Document) -> QueueResult<LeaseRecord> {
        let mut record: LeaseRecord = serde_json::from_value(document.body)?;
        record.version_token = document.etag;
        Ok(record)
    }

    fn decode_value(&self, value: Value) -> QueueResult<LeaseRecord> {
        Ok(serde_json::from_value(value)?)
    }
}
