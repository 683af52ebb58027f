use super::{codec, config, feature_doc, features, live_docs, store_with};
use crate::builder::VocabularyBuilder;
use crate::document::FieldValue;
use crate::error::Error;
use crate::store::DocumentStore;

#[test]
fn test_missing_only_leaves_encoded_documents_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_with(&[4, 4, 4], 3);
    store.add_document(feature_doc("empty", &[])).unwrap();
    store.commit().unwrap();
    let builder = VocabularyBuilder::new(store.clone(), config(dir.path(), 2), codec()).unwrap();
    builder.build_vocabulary_and_encode().unwrap();
    let before = live_docs(&store);

    // A featureless document encodes to empty token text
    let fields = builder.key().fields();
    assert!(before["empty"].is_field_empty(&fields.visual_words));

    for i in 3..5 {
        store
            .add_document(feature_doc(&format!("doc{i}"), &features(i, 2, 3)))
            .unwrap();
    }
    store.commit().unwrap();

    let report = builder.encode_missing_only().unwrap();
    assert_eq!(report.encoded, 2);
    assert_eq!(report.skipped, 4);
    assert!(report.clustering.is_none());

    let after = live_docs(&store);
    for id in ["doc0", "doc1", "doc2", "empty"] {
        assert_eq!(before[id], after[id]);
    }
    for id in ["doc3", "doc4"] {
        assert!(!after[id].is_field_empty(&fields.visual_words));
    }

    // Second pass finds nothing to do and appends no versions
    let max_doc = store.max_doc().unwrap();
    let report = builder.encode_missing_only().unwrap();
    assert_eq!(report.encoded, 0);
    assert_eq!(store.max_doc().unwrap(), max_doc);
}

#[test]
fn test_missing_only_requires_vocabulary() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_with(&[4], 3);
    let builder = VocabularyBuilder::new(store, config(dir.path(), 2), codec()).unwrap();
    assert!(matches!(
        builder.encode_missing_only(),
        Err(Error::VocabularyNotFound(_))
    ));
}

#[test]
fn test_stale_fingerprints_only_reencoded_on_request() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_with(&[4, 4, 4], 3);
    let builder = VocabularyBuilder::new(store.clone(), config(dir.path(), 2), codec()).unwrap();
    builder.build_vocabulary_and_encode().unwrap();

    let fields = builder.key().fields();
    let mut doc = live_docs(&store).remove("doc1").unwrap();
    doc.set(
        fields.fingerprint.as_str(),
        FieldValue::Text("0000000000000000".to_string()),
    );
    store
        .update_document((crate::DEFAULT_ID_FIELD, "doc1"), doc)
        .unwrap();
    store.commit().unwrap();

    let report = builder.encode_missing_only().unwrap();
    assert_eq!(report.encoded, 0);

    let mut cfg = builder.config().clone();
    cfg.reencode_stale = true;
    let stale_aware = VocabularyBuilder::new(store.clone(), cfg, codec()).unwrap();
    let report = stale_aware.encode_missing_only().unwrap();
    assert_eq!(report.encoded, 1);

    let doc = live_docs(&store).remove("doc1").unwrap();
    assert_eq!(
        doc.get_first(&fields.fingerprint).and_then(|v| v.as_text()),
        Some(report.fingerprint.as_str())
    );
}

#[test]
fn test_single_document_matches_stored_encoding() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_with(&[5, 3, 4], 8);
    let builder = VocabularyBuilder::new(store.clone(), config(dir.path(), 2), codec()).unwrap();
    builder.build_vocabulary_and_encode().unwrap();

    // A fresh builder reads the persisted vocabulary from disk
    let fresh = VocabularyBuilder::new(store.clone(), config(dir.path(), 2), codec()).unwrap();
    let hist_field = builder.key().fields().histogram.unwrap();
    for doc in live_docs(&store).values() {
        let descriptor = fresh.encode_single_document(doc).unwrap();
        let stored = doc
            .get_first(&hist_field)
            .and_then(|v| v.as_bytes())
            .unwrap();
        assert_eq!(descriptor.to_bytes(), stored);
    }

    let empty = crate::document::Document::new();
    let descriptor = fresh.encode_single_document(&empty).unwrap();
    assert_eq!(descriptor.as_histogram(), Some(&[0u32, 0][..]));
}
