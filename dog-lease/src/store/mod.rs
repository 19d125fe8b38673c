#[cfg(feature = "memory")]
pub mod memory;

use async_trait::async_trait;
use futures::TryStreamExt;
use futures_core::Stream;
use serde_json::Value;
use std::pin::Pin;

use crate::{
    QueueResult,
    types::{DocumentQuery, EntryId, PatchOperation, VersionToken, WriteCondition},
};

/// Type alias for boxed streams (stable Rust compatible)
pub type BoxStream<T> = Pin<Box<dyn Stream<Item = T> + Send + 'static>>;

/// A stored document together with its current version
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: EntryId,
    pub etag: VersionToken,
    /// Full JSON body, including the store-maintained `_etag`
    pub body: Value,
}

/// Document store primitives the lease protocol is built on.
///
/// Every write bumps the document's etag. Conditional writes fail with
/// `QueueError::VersionConflict` when the precondition does not hold and with
/// `QueueError::NotFound` when the document does not exist.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert a new document; the body must carry a string `id`
    async fn create(&self, partition: &str, body: Value) -> QueueResult<Document>;

    /// Point read
    async fn read(&self, id: &EntryId, partition: &str) -> QueueResult<Document>;

    /// Apply all operations atomically, or none of them
    async fn patch(
        &self,
        id: &EntryId,
        partition: &str,
        operations: &[PatchOperation],
        condition: WriteCondition,
    ) -> QueueResult<Document>;

    async fn delete(&self, id: &EntryId, partition: &str, condition: WriteCondition) -> QueueResult<()>;

    /// Lazily stream the results of a parameterized query within one partition
    fn query(&self, partition: &str, query: &DocumentQuery) -> BoxStream<QueueResult<Value>>;
}

/// Drain a query stream into a vector
pub async fn collect_query<S>(store: &S, partition: &str, query: &DocumentQuery) -> QueueResult<Vec<Value>>
where
    S: DocumentStore + ?Sized,
{
    store.query(partition, query).try_collect().await
}
