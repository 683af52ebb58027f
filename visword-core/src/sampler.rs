//! Document sampling for vocabulary construction
//!
//! Clustering cost grows with the number of features, so vocabularies are
//! built from a bounded, duplicate-free sample of documents. Three regimes:
//! - every live document when the request covers the whole collection
//! - the full live set trimmed at random when the request is within
//!   [`TRIM_WINDOW`] of the collection size
//! - draws without replacement, each validated against the store

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::DocId;
use crate::error::{Error, Result};
use crate::store::{DocEntry, DocumentStore};

/// Requests this close to the collection size trim the full set instead of drawing
pub const TRIM_WINDOW: usize = 100;

/// Draws allowed per wanted document before giving up
pub const MAX_DRAWS_PER_DOC: usize = 100;

pub struct VocabularySampler<'a> {
    store: &'a dyn DocumentStore,
    feature_field: &'a str,
    rng: StdRng,
}

impl<'a> VocabularySampler<'a> {
    pub fn new(store: &'a dyn DocumentStore, feature_field: &'a str, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            store,
            feature_field,
            rng,
        }
    }

    /// Pick document ids to cluster, in ascending order
    ///
    /// `wanted = None` asks for half of the id space.
    pub fn select(&mut self, wanted: Option<usize>) -> Result<Vec<DocId>> {
        let entries = self.store.list_documents()?;
        let total = entries.len();
        let wanted = wanted.unwrap_or(total / 2);
        let live = || entries.iter().filter(|e| e.live).map(|e| e.id);

        let mut ids: Vec<DocId> = if wanted >= total {
            live().collect()
        } else if total - wanted <= TRIM_WINDOW {
            let mut ids: Vec<DocId> = live().collect();
            while ids.len() > wanted {
                let victim = self.rng.random_range(0..ids.len());
                ids.swap_remove(victim);
            }
            ids
        } else {
            let mut pool: Vec<usize> = (0..total).collect();
            let mut accepted = Vec::with_capacity(wanted);
            let max_draws = wanted.saturating_mul(MAX_DRAWS_PER_DOC);
            let mut attempts = 0usize;
            while accepted.len() < wanted {
                if pool.is_empty() || attempts >= max_draws {
                    return Err(Error::SamplingExhausted {
                        wanted,
                        accepted: accepted.len(),
                        attempts,
                    });
                }
                attempts += 1;
                let entry = entries[pool.swap_remove(self.rng.random_range(0..pool.len()))];
                if self.is_usable(entry)? {
                    accepted.push(entry.id);
                }
            }
            log::debug!(
                "Sampled {} of {} documents in {} draws",
                accepted.len(),
                total,
                attempts
            );
            accepted
        };

        ids.sort_unstable();
        Ok(ids)
    }

    /// Live and carrying at least one local feature
    fn is_usable(&self, entry: DocEntry) -> Result<bool> {
        if !entry.live {
            return Ok(false);
        }
        Ok(!self
            .store
            .get_field_values(entry.id, self.feature_field)?
            .is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;
    use crate::store::RamStore;
    use rustc_hash::FxHashSet;

    fn store_with(n: usize, with_features: impl Fn(usize) -> bool) -> RamStore {
        let store = RamStore::default();
        for i in 0..n {
            let mut doc = Document::new();
            doc.add_text("identifier", format!("doc{i}"));
            if with_features(i) {
                doc.add_bytes("surf", vec![0u8; 8]);
            }
            store.add_document(doc).unwrap();
        }
        store
    }

    fn assert_unique_below(ids: &[DocId], bound: DocId) {
        let set: FxHashSet<_> = ids.iter().copied().collect();
        assert_eq!(set.len(), ids.len());
        assert!(ids.iter().all(|&id| id < bound));
    }

    #[test]
    fn test_wanted_covers_everything() {
        let store = store_with(1000, |_| true);
        let ids = VocabularySampler::new(&store, "surf", Some(1))
            .select(Some(1000))
            .unwrap();
        assert_eq!(ids.len(), 1000);
        assert_unique_below(&ids, 1000);
    }

    #[test]
    fn test_trim_regime() {
        let store = store_with(1000, |_| true);
        let ids = VocabularySampler::new(&store, "surf", Some(2))
            .select(Some(950))
            .unwrap();
        assert_eq!(ids.len(), 950);
        assert_unique_below(&ids, 1000);
    }

    #[test]
    fn test_draw_regime_skips_deleted() {
        let store = store_with(1000, |_| true);
        for i in (0..1000).step_by(3) {
            store
                .delete_document(("identifier", format!("doc{i}").as_str()))
                .unwrap();
        }
        let ids = VocabularySampler::new(&store, "surf", Some(3))
            .select(Some(10))
            .unwrap();
        assert_eq!(ids.len(), 10);
        assert_unique_below(&ids, 1000);
        for id in ids {
            assert!(store.is_live(id).unwrap());
        }
    }

    #[test]
    fn test_draw_regime_skips_documents_without_features() {
        let store = store_with(500, |i| i % 2 == 0);
        let ids = VocabularySampler::new(&store, "surf", Some(4))
            .select(Some(20))
            .unwrap();
        assert_eq!(ids.len(), 20);
        assert!(ids.iter().all(|id| id % 2 == 0));
    }

    #[test]
    fn test_default_is_half() {
        let store = store_with(400, |_| true);
        let ids = VocabularySampler::new(&store, "surf", Some(5))
            .select(None)
            .unwrap();
        assert_eq!(ids.len(), 200);
    }

    #[test]
    fn test_exhaustion() {
        // Only 5 documents carry features but 50 are wanted
        let store = store_with(1000, |i| i < 5);
        let err = VocabularySampler::new(&store, "surf", Some(6))
            .select(Some(50))
            .unwrap_err();
        match err {
            Error::SamplingExhausted {
                wanted,
                accepted,
                attempts,
            } => {
                assert_eq!(wanted, 50);
                assert_eq!(accepted, 5);
                assert_eq!(attempts, 1000);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_exhaustion_by_draw_budget() {
        let store = store_with(1000, |_| false);
        let err = VocabularySampler::new(&store, "surf", Some(7))
            .select(Some(2))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::SamplingExhausted {
                accepted: 0,
                attempts: 200,
                ..
            }
        ));
    }

    #[test]
    fn test_same_seed_same_sample() {
        let store = store_with(300, |_| true);
        let a = VocabularySampler::new(&store, "surf", Some(8))
            .select(Some(25))
            .unwrap();
        let b = VocabularySampler::new(&store, "surf", Some(8))
            .select(Some(25))
            .unwrap();
        assert_eq!(a, b);
    }
}
