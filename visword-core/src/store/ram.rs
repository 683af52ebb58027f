//! In-memory document store

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use super::{DocEntry, DocKey, DocumentStore};
use crate::DocId;
use crate::document::Document;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StoredDoc {
    pub(crate) doc: Document,
    pub(crate) live: bool,
}

/// Snapshot of the whole id space
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct StoreState {
    pub(crate) docs: Vec<StoredDoc>,
}

struct Inner {
    pending: StoreState,
    committed: StoreState,
    /// Live key value -> id, for the store's key field
    keys: FxHashMap<String, DocId>,
}

impl Inner {
    fn from_state(state: StoreState, key_field: &str) -> Self {
        let keys = build_key_index(&state, key_field);
        Self {
            committed: state.clone(),
            pending: state,
            keys,
        }
    }

    /// Every live slot matching `key`
    fn find_live(&self, key_field: &str, key: DocKey<'_>) -> Vec<DocId> {
        let (field, value) = key;
        if field == key_field {
            return self.keys.get(value).copied().into_iter().collect();
        }
        self.pending
            .docs
            .iter()
            .enumerate()
            .filter(|(_, d)| {
                d.live
                    && d.doc
                        .get_all(field)
                        .any(|v| v.as_text() == Some(value))
            })
            .map(|(pos, _)| pos as DocId)
            .collect()
    }

    /// Reject `doc` if its key belongs to a live slot not in `replacing`
    fn check_key(&self, key_field: &str, doc: &Document, replacing: &[DocId]) -> Result<()> {
        if let Some(key) = doc.get_first(key_field).and_then(|v| v.as_text())
            && let Some(id) = self.keys.get(key)
            && !replacing.contains(id)
        {
            return Err(Error::DuplicatePrimaryKey(key.to_string()));
        }
        Ok(())
    }

    fn push(&mut self, key_field: &str, doc: Document) -> Result<DocId> {
        let id = DocId::try_from(self.pending.docs.len())
            .map_err(|_| Error::Internal("document id space exhausted".to_string()))?;
        if let Some(key) = doc.get_first(key_field).and_then(|v| v.as_text()) {
            self.keys.insert(key.to_string(), id);
        }
        self.pending.docs.push(StoredDoc { doc, live: true });
        Ok(id)
    }

    fn kill(&mut self, key_field: &str, id: DocId) {
        if let Some(slot) = self.pending.docs.get_mut(id as usize) {
            slot.live = false;
            if let Some(key) = slot.doc.get_first(key_field).and_then(|v| v.as_text())
                && self.keys.get(key) == Some(&id)
            {
                self.keys.remove(key);
            }
        }
    }
}

fn build_key_index(state: &StoreState, key_field: &str) -> FxHashMap<String, DocId> {
    let mut keys = FxHashMap::default();
    for (id, slot) in state.docs.iter().enumerate() {
        if !slot.live {
            continue;
        }
        if let Some(key) = slot.doc.get_first(key_field).and_then(|v| v.as_text()) {
            keys.insert(key.to_string(), id as DocId);
        }
    }
    keys
}

/// In-memory store; clones share the same underlying state
#[derive(Clone)]
pub struct RamStore {
    key_field: Arc<str>,
    inner: Arc<RwLock<Inner>>,
}

impl Default for RamStore {
    fn default() -> Self {
        Self::new(crate::DEFAULT_ID_FIELD)
    }
}

impl RamStore {
    /// Create an empty store whose unique identifier lives in `key_field`
    pub fn new(key_field: &str) -> Self {
        Self::from_state(key_field, StoreState::default())
    }

    pub(crate) fn from_state(key_field: &str, state: StoreState) -> Self {
        Self {
            key_field: Arc::from(key_field),
            inner: Arc::new(RwLock::new(Inner::from_state(state, key_field))),
        }
    }

    pub fn key_field(&self) -> &str {
        &self.key_field
    }

    /// True when writes are pending since the last commit
    pub fn has_uncommitted_changes(&self) -> bool {
        let inner = self.inner.read();
        inner.pending.docs.len() != inner.committed.docs.len()
            || inner
                .pending
                .docs
                .iter()
                .zip(&inner.committed.docs)
                .any(|(a, b)| a.live != b.live || a.doc != b.doc)
    }

    pub(crate) fn pending_snapshot(&self) -> StoreState {
        self.inner.read().pending.clone()
    }

    pub(crate) fn committed_snapshot(&self) -> StoreState {
        self.inner.read().committed.clone()
    }

    /// Replace pending and committed state (used when reloading from disk)
    pub(crate) fn reset(&self, state: StoreState) {
        let mut inner = self.inner.write();
        *inner = Inner::from_state(state, &self.key_field);
    }

    pub(crate) fn mark_committed(&self) {
        let mut inner = self.inner.write();
        inner.committed = inner.pending.clone();
    }

    pub(crate) fn compact_in_place(&self) -> usize {
        let mut inner = self.inner.write();
        let before = inner.pending.docs.len();
        inner.pending.docs.retain(|d| d.live);
        let removed = before - inner.pending.docs.len();
        inner.keys = build_key_index(&inner.pending, &self.key_field);
        inner.committed = inner.pending.clone();
        removed
    }
}

impl DocumentStore for RamStore {
    fn list_documents(&self) -> Result<Vec<DocEntry>> {
        let inner = self.inner.read();
        Ok(inner
            .pending
            .docs
            .iter()
            .enumerate()
            .map(|(id, d)| DocEntry {
                id: id as DocId,
                live: d.live,
            })
            .collect())
    }

    fn max_doc(&self) -> Result<DocId> {
        Ok(self.inner.read().pending.docs.len() as DocId)
    }

    fn is_live(&self, id: DocId) -> Result<bool> {
        Ok(self
            .inner
            .read()
            .pending
            .docs
            .get(id as usize)
            .is_some_and(|d| d.live))
    }

    fn get_document(&self, id: DocId) -> Result<Option<Document>> {
        Ok(self
            .inner
            .read()
            .pending
            .docs
            .get(id as usize)
            .filter(|d| d.live)
            .map(|d| d.doc.clone()))
    }

    fn get_field_values(&self, id: DocId, field: &str) -> Result<Vec<Vec<u8>>> {
        let inner = self.inner.read();
        Ok(inner
            .pending
            .docs
            .get(id as usize)
            .filter(|d| d.live)
            .map(|d| d.doc.get_all(field).map(|v| v.to_bytes()).collect())
            .unwrap_or_default())
    }

    fn add_document(&self, doc: Document) -> Result<DocId> {
        let mut inner = self.inner.write();
        inner.check_key(&self.key_field, &doc, &[])?;
        inner.push(&self.key_field, doc)
    }

    fn update_document(&self, key: DocKey<'_>, doc: Document) -> Result<DocId> {
        let mut inner = self.inner.write();
        let old = inner.find_live(&self.key_field, key);
        inner.check_key(&self.key_field, &doc, &old)?;
        for id in old {
            inner.kill(&self.key_field, id);
        }
        inner.push(&self.key_field, doc)
    }

    fn delete_document(&self, key: DocKey<'_>) -> Result<bool> {
        let mut inner = self.inner.write();
        let old = inner.find_live(&self.key_field, key);
        for &id in &old {
            inner.kill(&self.key_field, id);
        }
        Ok(!old.is_empty())
    }

    fn commit(&self) -> Result<()> {
        self.mark_committed();
        Ok(())
    }

    fn compact(&self) -> Result<()> {
        let removed = self.compact_in_place();
        log::debug!("RamStore compaction dropped {} deleted slots", removed);
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        let committed = self.committed_snapshot();
        self.reset(committed);
        Ok(())
    }
}
