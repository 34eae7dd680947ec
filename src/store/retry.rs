use anyhow::Result;
use serde_json::Value;
use std::sync::Arc;

use super::{DocumentStore, FieldFilter, ObjectStore};
use crate::api::RetryPolicy;
use crate::api::retry::{Attempt, with_retry};
use crate::domain::LotRecord;
use crate::error::StoreError;

/// Bad keys, missing entries and corrupt documents fail the same way on every attempt
pub fn classify(error: anyhow::Error) -> Attempt {
    let permanent = error.chain().any(|c| {
        c.is::<StoreError>()
            || c.is::<serde_json::Error>()
            || c.downcast_ref::<std::io::Error>()
                .is_some_and(|e| e.kind() == std::io::ErrorKind::NotFound)
    });
    if permanent {
        Attempt::Fatal(error)
    } else {
        Attempt::Transient(error)
    }
}

/// Object store wrapper that retries transient failures
pub struct RetryingObjectStore {
    inner: Arc<dyn ObjectStore>,
    policy: RetryPolicy,
}

impl RetryingObjectStore {
    pub fn new(inner: Arc<dyn ObjectStore>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

impl ObjectStore for RetryingObjectStore {
    fn put(&self, path: &str, bytes: &[u8]) -> Result<String> {
        with_retry(&self.policy, "object store", || {
            self.inner.put(path, bytes).map_err(classify)
        })
    }

    fn get(&self, path: &str) -> Result<Vec<u8>> {
        with_retry(&self.policy, "object store", || {
            self.inner.get(path).map_err(classify)
        })
    }

    fn url(&self, path: &str) -> String {
        self.inner.url(path)
    }
}

/// Document store wrapper that retries transient failures
pub struct RetryingDocumentStore {
    inner: Arc<dyn DocumentStore>,
    policy: RetryPolicy,
}

impl RetryingDocumentStore {
    pub fn new(inner: Arc<dyn DocumentStore>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    fn call<T>(&self, mut op: impl FnMut(&dyn DocumentStore) -> Result<T>) -> Result<T> {
        with_retry(&self.policy, "document store", || {
            op(self.inner.as_ref()).map_err(classify)
        })
    }
}

impl DocumentStore for RetryingDocumentStore {
    fn insert(&self, record: &LotRecord) -> Result<()> {
        self.call(|s| s.insert(record))
    }

    fn get(&self, id: &str) -> Result<Option<LotRecord>> {
        self.call(|s| s.get(id))
    }

    fn get_field(&self, id: &str, path: &str) -> Result<Option<Value>> {
        self.call(|s| s.get_field(id, path))
    }

    fn set_field(&self, id: &str, path: &str, value: Value) -> Result<()> {
        self.call(|s| s.set_field(id, path, value.clone()))
    }

    fn unset_field(&self, id: &str, path: &str) -> Result<()> {
        self.call(|s| s.unset_field(id, path))
    }

    fn ids(&self) -> Result<Vec<String>> {
        self.call(|s| s.ids())
    }

    fn find(&self, filter: &FieldFilter) -> Result<Vec<String>> {
        self.call(|s| s.find(filter))
    }
}
