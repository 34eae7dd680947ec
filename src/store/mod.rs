//! Persistence collaborators: per-lot documents and artifact blobs

pub mod document;
pub mod object;
pub mod retry;

pub use document::{DocumentStore, FieldFilter, JsonDirStore, MemoryStore};
pub use object::{LocalObjectStore, MemoryObjectStore, ObjectStore};
pub use retry::{RetryingDocumentStore, RetryingObjectStore};
