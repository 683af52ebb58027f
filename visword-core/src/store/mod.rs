//! Document store contract consumed by the vocabulary pipeline
//!
//! The pipeline never owns document lifecycle. It enumerates ids with their
//! liveness, reads feature fields, and writes encodings back through an
//! atomic update keyed by a unique identifier field. Two reference stores
//! are provided:
//! - [`RamStore`] - in-memory, clonable handle over shared state
//! - [`FsStore`] - `RamStore` plus a snapshot file written on commit

mod fs;
mod ram;

pub use fs::{FsStore, STORE_FILENAME};
pub use ram::RamStore;

use crate::DocId;
use crate::document::Document;
use crate::error::Result;

/// One slot of the store's id space
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocEntry {
    pub id: DocId,
    /// False for soft-deleted (superseded or removed) documents
    pub live: bool,
}

/// Key identifying a document by the value of a unique field
pub type DocKey<'a> = (&'a str, &'a str);

/// Storage backend for documents
///
/// Implementations serialize their own writers; every method takes `&self`
/// so a store can be shared across encoding workers.
pub trait DocumentStore: Send + Sync {
    /// Enumerate every id in `[0, max_doc)` with its liveness flag
    fn list_documents(&self) -> Result<Vec<DocEntry>>;

    /// Size of the id space, including soft-deleted slots
    fn max_doc(&self) -> Result<DocId>;

    /// Whether `id` refers to a live document
    fn is_live(&self, id: DocId) -> Result<bool>;

    /// Load a live document, `None` for deleted or unknown ids
    fn get_document(&self, id: DocId) -> Result<Option<Document>>;

    /// All values of `field` for a live document, as raw bytes
    fn get_field_values(&self, id: DocId, field: &str) -> Result<Vec<Vec<u8>>>;

    /// Append a new document; its key value must not belong to a live document
    fn add_document(&self, doc: Document) -> Result<DocId>;

    /// Atomically replace every live document matching `key` with `doc`
    ///
    /// The previous version is soft-deleted and the new one appended in the
    /// same critical section, so readers see either the old or the new
    /// version, never neither. Inserts when no document matches.
    fn update_document(&self, key: DocKey<'_>, doc: Document) -> Result<DocId>;

    /// Soft-delete every live document matching `key`
    fn delete_document(&self, key: DocKey<'_>) -> Result<bool>;

    /// Make all pending writes durable
    fn commit(&self) -> Result<()>;

    /// Drop soft-deleted slots and renumber; the result becomes committed state
    fn compact(&self) -> Result<()>;

    /// Discard writes made since the last commit
    fn rollback(&self) -> Result<()>;

    /// Number of live documents
    fn num_docs(&self) -> Result<usize> {
        Ok(self.list_documents()?.iter().filter(|e| e.live).count())
    }
}
