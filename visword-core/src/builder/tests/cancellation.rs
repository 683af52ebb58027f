use std::sync::Arc;

use super::{codec, config, live_docs, store_with};
use crate::builder::VocabularyBuilder;
use crate::error::Error;
use crate::progress::{CancellationToken, Phase, ProgressReporter};
use crate::store::DocumentStore;

/// Cancels the pass as soon as `phase` is reported
struct CancelAt {
    phase: Phase,
    token: CancellationToken,
}

impl ProgressReporter for CancelAt {
    fn report(&self, phase: Phase, _percent: u8) {
        if phase == self.phase {
            self.token.cancel();
        }
    }
}

#[test]
fn test_cancelled_before_start() {
    let dir = tempfile::tempdir().unwrap();
    let token = CancellationToken::new();
    token.cancel();
    let builder = VocabularyBuilder::new(store_with(&[4, 4], 2), config(dir.path(), 2), codec())
        .unwrap()
        .with_cancellation(token);

    assert!(matches!(
        builder.build_vocabulary_and_encode(),
        Err(Error::Cancelled)
    ));
    assert!(!builder.vocabulary_path().exists());
}

#[test]
fn test_cancel_during_clustering_writes_no_vocabulary() {
    let dir = tempfile::tempdir().unwrap();
    let token = CancellationToken::new();
    let builder = VocabularyBuilder::new(store_with(&[4, 4, 4], 2), config(dir.path(), 2), codec())
        .unwrap()
        .with_cancellation(token.clone())
        .with_reporter(Arc::new(CancelAt {
            phase: Phase::Clustering,
            token,
        }));

    assert!(matches!(
        builder.build_vocabulary_and_encode(),
        Err(Error::Cancelled)
    ));
    assert!(!builder.vocabulary_path().exists());
}

#[test]
fn test_cancel_during_encoding_does_not_commit() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_with(&[4, 4, 4, 4, 4, 4], 2);
    let token = CancellationToken::new();
    let builder = VocabularyBuilder::new(store.clone(), config(dir.path(), 2), codec())
        .unwrap()
        .with_cancellation(token.clone())
        .with_reporter(Arc::new(CancelAt {
            phase: Phase::Encoding,
            token,
        }));

    assert!(matches!(
        builder.build_vocabulary_and_encode(),
        Err(Error::Cancelled)
    ));
    assert!(!store.has_uncommitted_changes());
    assert_eq!(store.max_doc().unwrap(), 6);
    let vw = builder.key().fields().visual_words;
    assert!(live_docs(&store).values().all(|d| d.get_first(&vw).is_none()));
}
