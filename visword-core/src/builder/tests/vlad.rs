use super::{codec, config, feature_doc, live_docs, store_with};
use crate::builder::VocabularyBuilder;
use crate::encoder::EncodedDescriptor;
use crate::store::DocumentStore;
use crate::structures::EncodingKind;

fn vlad(doc: &crate::document::Document, field: &str) -> Vec<f64> {
    let bytes = doc.get_first(field).and_then(|v| v.as_bytes()).unwrap();
    EncodedDescriptor::from_bytes(EncodingKind::Vlad, bytes)
        .unwrap()
        .as_vlad()
        .unwrap()
        .to_vec()
}

#[test]
fn test_vlad_build() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_with(&[5, 3, 4, 6], 4);
    store.add_document(feature_doc("empty", &[])).unwrap();
    store.commit().unwrap();

    let mut cfg = config(dir.path(), 3);
    cfg.encoding = EncodingKind::Vlad;
    assert_eq!(cfg.workers(), 4);
    let builder = VocabularyBuilder::new(store.clone(), cfg, codec()).unwrap();
    let report = builder.build_vocabulary_and_encode().unwrap();
    assert_eq!(report.encoded, 5);
    assert!(
        builder
            .vocabulary_path()
            .to_string_lossy()
            .ends_with("vlad-surf-dog-k3.vwv")
    );

    let fields = builder.key().fields();
    assert!(fields.histogram.is_none());
    let docs = live_docs(&store);
    for (id, doc) in &docs {
        let v = vlad(doc, &fields.visual_words);
        assert_eq!(v.len(), 3 * 4);
        let norm = v.iter().map(|x| x * x).sum::<f64>().sqrt();
        if id == "empty" {
            assert_eq!(norm, 0.0);
        } else {
            // No featured document sits exactly on its centroids
            assert!((norm - 1.0).abs() < 1e-9, "{id}: {norm}");
        }
    }
}

#[test]
fn test_bovw_and_vlad_share_a_store() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_with(&[4, 4, 4, 4], 2);

    let bovw = VocabularyBuilder::new(store.clone(), config(dir.path(), 2), codec()).unwrap();
    bovw.build_vocabulary_and_encode().unwrap();

    let mut cfg = config(dir.path(), 2);
    cfg.encoding = EncodingKind::Vlad;
    let vlad_builder = VocabularyBuilder::new(store.clone(), cfg, codec()).unwrap();
    vlad_builder.build_vocabulary_and_encode().unwrap();

    assert_ne!(bovw.vocabulary_path(), vlad_builder.vocabulary_path());
    assert!(bovw.vocabulary_path().exists());
    assert!(vlad_builder.vocabulary_path().exists());

    let bovw_fields = bovw.key().fields();
    let vlad_fields = vlad_builder.key().fields();
    for doc in live_docs(&store).values() {
        assert!(doc.get_first(&bovw_fields.visual_words).is_some());
        assert!(doc.get_first(&vlad_fields.visual_words).is_some());
    }
    assert_eq!(store.num_docs().unwrap(), 4);
}
