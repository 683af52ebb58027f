//! Filesystem-backed document store
//!
//! Documents live in memory (a [`RamStore`]) and the committed state is
//! persisted as a JSON snapshot. Snapshots are written to a temporary
//! sibling and renamed into place, so a crash mid-commit leaves the
//! previous snapshot intact.

use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use super::ram::{RamStore, StoreState};
use super::{DocEntry, DocKey, DocumentStore};
use crate::DocId;
use crate::document::Document;
use crate::error::Result;

/// Snapshot file name inside the store directory
pub const STORE_FILENAME: &str = "documents.json";

/// Store persisted in a directory
#[derive(Clone)]
pub struct FsStore {
    root: PathBuf,
    ram: RamStore,
}

impl FsStore {
    /// Open the store at `root`, creating the directory if needed
    pub fn open(root: impl AsRef<Path>, key_field: &str) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        let state = read_snapshot(&root.join(STORE_FILENAME))?;
        log::debug!(
            "Opened store at {:?} with {} slots",
            root,
            state.docs.len()
        );
        Ok(Self {
            ram: RamStore::from_state(key_field, state),
            root,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn snapshot_path(&self) -> PathBuf {
        self.root.join(STORE_FILENAME)
    }

    fn persist(&self, state: &StoreState) -> Result<()> {
        let path = self.snapshot_path();
        let tmp = path.with_extension("json.tmp");
        {
            let file = fs::File::create(&tmp)?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer(&mut writer, state)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

fn read_snapshot(path: &Path) -> Result<StoreState> {
    if !path.exists() {
        return Ok(StoreState::default());
    }
    let reader = BufReader::new(fs::File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

impl DocumentStore for FsStore {
    fn list_documents(&self) -> Result<Vec<DocEntry>> {
        self.ram.list_documents()
    }

    fn max_doc(&self) -> Result<DocId> {
        self.ram.max_doc()
    }

    fn is_live(&self, id: DocId) -> Result<bool> {
        self.ram.is_live(id)
    }

    fn get_document(&self, id: DocId) -> Result<Option<Document>> {
        self.ram.get_document(id)
    }

    fn get_field_values(&self, id: DocId, field: &str) -> Result<Vec<Vec<u8>>> {
        self.ram.get_field_values(id, field)
    }

    fn add_document(&self, doc: Document) -> Result<DocId> {
        self.ram.add_document(doc)
    }

    fn update_document(&self, key: DocKey<'_>, doc: Document) -> Result<DocId> {
        self.ram.update_document(key, doc)
    }

    fn delete_document(&self, key: DocKey<'_>) -> Result<bool> {
        self.ram.delete_document(key)
    }

    fn commit(&self) -> Result<()> {
        let state = self.ram.pending_snapshot();
        self.persist(&state)?;
        self.ram.mark_committed();
        log::debug!("Committed {} slots to {:?}", state.docs.len(), self.root);
        Ok(())
    }

    fn compact(&self) -> Result<()> {
        let removed = self.ram.compact_in_place();
        self.persist(&self.ram.committed_snapshot())?;
        log::debug!("Compaction dropped {} deleted slots", removed);
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        let state = read_snapshot(&self.snapshot_path())?;
        self.ram.reset(state);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_doc(id: &str) -> Document {
        let mut doc = Document::new();
        doc.add_text("identifier", id);
        doc.add_bytes("surf", vec![1, 2, 3]);
        doc
    }

    #[test]
    fn test_reopen_sees_committed_state_only() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FsStore::open(dir.path(), "identifier").unwrap();
            store.add_document(make_doc("a")).unwrap();
            store.commit().unwrap();
            store.add_document(make_doc("b")).unwrap();
        }

        let store = FsStore::open(dir.path(), "identifier").unwrap();
        assert_eq!(store.num_docs().unwrap(), 1);
        assert_eq!(
            store.get_field_values(0, "surf").unwrap(),
            vec![vec![1, 2, 3]]
        );
    }

    #[test]
    fn test_rollback_reloads_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::open(dir.path(), "identifier").unwrap();
        store.add_document(make_doc("a")).unwrap();
        store.commit().unwrap();

        store.delete_document(("identifier", "a")).unwrap();
        assert_eq!(store.num_docs().unwrap(), 0);
        store.rollback().unwrap();
        assert_eq!(store.num_docs().unwrap(), 1);
    }

    #[test]
    fn test_compact_persists() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::open(dir.path(), "identifier").unwrap();
        store.add_document(make_doc("a")).unwrap();
        store.add_document(make_doc("b")).unwrap();
        store
            .update_document(("identifier", "a"), make_doc("a"))
            .unwrap();
        store.compact().unwrap();

        let reopened = FsStore::open(dir.path(), "identifier").unwrap();
        assert_eq!(reopened.max_doc().unwrap(), 2);
        assert!(!dir.path().join("documents.json.tmp").exists());
    }
}
