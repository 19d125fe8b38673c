use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use crate::{
    QueueError, QueueResult,
    store::{BoxStream, Document, DocumentStore},
    types::{fields, DocumentQuery, EntryId, PatchOperation, VersionToken, WriteCondition},
};

type DocumentKey = (String, EntryId);

/// In-memory document store with etag semantics, for tests and development
#[derive(Clone, Default)]
pub struct MemoryDocumentStore {
    /// Documents by (partition, id); bodies carry their `_etag`
    pub(crate) documents: Arc<RwLock<HashMap<DocumentKey, Value>>>,

    /// Errors returned by the next calls, in order
    injected_failures: Arc<Mutex<VecDeque<QueueError>>>,

    queries: Arc<AtomicU64>,
    writes: Arc<AtomicU64>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next store call fail with `error`. Calls queue up.
    pub fn fail_next(&self, error: QueueError) {
        self.injected_failures.lock().push_back(error);
    }

    /// Number of queries executed so far
    pub fn query_count(&self) -> u64 {
        self.queries.load(Ordering::SeqCst)
    }

    /// Number of successful writes (create, patch, delete)
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of documents in a partition
    pub fn len(&self, partition: &str) -> usize {
        self.documents.read().keys().filter(|(p, _)| p == partition).count()
    }

    pub fn is_empty(&self, partition: &str) -> bool {
        self.len(partition) == 0
    }

    fn take_failure(&self) -> QueueResult<()> {
        match self.injected_failures.lock().pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn document(id: &EntryId, body: &Value) -> Document {
        Document { id: id.clone(), etag: Self::current_etag(body), body: body.clone() }
    }

    fn stamp(body: &mut Value) -> QueueResult<VersionToken> {
        let etag = VersionToken::generate();
        body.as_object_mut()
            .ok_or_else(|| QueueError::invalid("documents must be JSON objects"))?
            .insert(fields::ETAG.to_string(), Value::String(etag.0.clone()));
        Ok(etag)
    }

    fn current_etag(body: &Value) -> VersionToken {
        body.get(fields::ETAG)
            .and_then(Value::as_str)
            .map(VersionToken::from)
            .unwrap_or_default()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn create(&self, partition: &str, mut body: Value) -> QueueResult<Document> {
        self.take_failure()?;

        let id = body
            .get(fields::ID)
            .and_then(Value::as_str)
            .map(EntryId::from)
            .ok_or_else(|| QueueError::invalid("document body has no string id"))?;

        let mut documents = self.documents.write();
        let key = (partition.to_string(), id.clone());
        if documents.contains_key(&key) {
            return Err(QueueError::conflict(id.as_str()));
        }

        Self::stamp(&mut body)?;
        let document = Self::document(&id, &body);
        documents.insert(key, body);
        self.writes.fetch_add(1, Ordering::SeqCst);

        Ok(document)
    }

    async fn read(&self, id: &EntryId, partition: &str) -> QueueResult<Document> {
        self.take_failure()?;

        let documents = self.documents.read();
        documents
            .get(&(partition.to_string(), id.clone()))
            .map(|body| Self::document(id, body))
            .ok_or_else(|| QueueError::not_found(id.as_str()))
    }

    async fn patch(
        &self,
        id: &EntryId,
        partition: &str,
        operations: &[PatchOperation],
        condition: WriteCondition,
    ) -> QueueResult<Document> {
        self.take_failure()?;

        let mut documents = self.documents.write();
        let body = documents
            .get_mut(&(partition.to_string(), id.clone()))
            .ok_or_else(|| QueueError::not_found(id.as_str()))?;

        if !condition.is_satisfied_by(&Self::current_etag(body)) {
            return Err(QueueError::conflict(id.as_str()));
        }

        // Work on a copy so a failing operation leaves the document untouched
        let mut updated = body.clone();
        for operation in operations {
            if matches!(operation.path(), "/id" | "/_etag") {
                return Err(QueueError::invalid(format!("{} cannot be patched", operation.path())));
            }
            operation.apply(&mut updated)?;
        }
        Self::stamp(&mut updated)?;

        *body = updated;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(Self::document(id, body))
    }

    async fn delete(&self, id: &EntryId, partition: &str, condition: WriteCondition) -> QueueResult<()> {
        self.take_failure()?;

        let mut documents = self.documents.write();
        let key = (partition.to_string(), id.clone());
        let body = documents.get(&key).ok_or_else(|| QueueError::not_found(id.as_str()))?;

        if !condition.is_satisfied_by(&Self::current_etag(body)) {
            return Err(QueueError::conflict(id.as_str()));
        }

        documents.remove(&key);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn query(&self, partition: &str, query: &DocumentQuery) -> BoxStream<QueueResult<Value>> {
        self.queries.fetch_add(1, Ordering::SeqCst);

        let results = self.take_failure().and_then(|()| {
            let documents = self.documents.read();
            let in_partition = documents
                .iter()
                .filter(|((p, _), _)| p == partition)
                .map(|(_, body)| body);
            query.evaluate(in_partition)
        });

        let items: Vec<QueueResult<Value>> = match results {
            Ok(values) => values.into_iter().map(Ok).collect(),
            Err(error) => vec![Err(error)],
        };
        Box::pin(futures::stream::iter(items))
    }
}
