mod cancellation;
mod missing;
mod vlad;

use std::path::Path;

use rustc_hash::FxHashMap;

use crate::builder::BuilderConfig;
use crate::clustering::EngineKind;
use crate::document::Document;
use crate::features::{CodecFactory, CodecKind, F64Codec, FeatureCodec};
use crate::store::{DocumentStore, RamStore};

pub(super) const FEATURE_FIELD: &str = "surf";

pub(super) fn codec() -> CodecFactory {
    CodecKind::F64.factory(FEATURE_FIELD, None)
}

/// Deterministic `dim`-dimensional features for document `doc`
pub(super) fn features(doc: usize, count: usize, dim: usize) -> Vec<Vec<f64>> {
    (0..count)
        .map(|j| {
            (0..dim)
                .map(|c| ((doc * 7 + j * 3 + c * 5) % 11) as f64 + (doc % 2) as f64 * 20.0)
                .collect()
        })
        .collect()
}

pub(super) fn feature_doc(id: &str, features: &[Vec<f64>]) -> Document {
    let codec = F64Codec::new(FEATURE_FIELD);
    let mut doc = Document::new();
    doc.add_text(crate::DEFAULT_ID_FIELD, id);
    for f in features {
        doc.add_bytes(FEATURE_FIELD, codec.encode(f));
    }
    doc
}

/// Committed store with one document per entry of `sizes`
pub(super) fn store_with(sizes: &[usize], dim: usize) -> RamStore {
    let store = RamStore::default();
    for (i, &n) in sizes.iter().enumerate() {
        store
            .add_document(feature_doc(&format!("doc{i}"), &features(i, n, dim)))
            .unwrap();
    }
    store.commit().unwrap();
    store
}

pub(super) fn config(vocabulary_dir: &Path, num_clusters: usize) -> BuilderConfig {
    BuilderConfig {
        num_clusters,
        sample_docs: Some(usize::MAX),
        engine: EngineKind::Single,
        seed: Some(17),
        vocabulary_dir: vocabulary_dir.to_path_buf(),
        progress_interval_ms: 1,
        ..Default::default()
    }
}

/// Live documents by identifier
pub(super) fn live_docs(store: &dyn DocumentStore) -> FxHashMap<String, Document> {
    let mut docs = FxHashMap::default();
    for entry in store.list_documents().unwrap() {
        if let Some(doc) = store.get_document(entry.id).unwrap() {
            let id = doc
                .get_first(crate::DEFAULT_ID_FIELD)
                .and_then(|v| v.as_text())
                .unwrap()
                .to_string();
            docs.insert(id, doc);
        }
    }
    docs
}
