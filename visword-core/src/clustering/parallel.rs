//! Multi-threaded k-means
//!
//! Each step splits the features into one contiguous chunk per thread.
//! Workers compute partial sums into their own buffers; the calling
//! thread folds them in chunk order and updates the centroids, so no
//! state is written concurrently.

use std::sync::Arc;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rayon::prelude::*;

use super::lloyd::{LloydState, Partial};
use super::{ClusteringEngine, Seeding};
use crate::DocId;
use crate::error::{Error, Result};
use crate::features::{Distance, LocalFeatureSet};
use crate::structures::Vocabulary;

/// Lloyd's algorithm with the assignment step spread over a thread pool
pub struct ParallelKMeans {
    state: LloydState,
    seeding: Seeding,
    rng: StdRng,
    threads: usize,
    pool: Arc<rayon::ThreadPool>,
}

impl ParallelKMeans {
    pub fn new(k: usize, distance: Distance, threads: usize) -> Result<Self> {
        let threads = threads.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|idx| format!("kmeans-{}", idx))
            .build()
            .map_err(|e| Error::Io(std::io::Error::other(e)))?;
        Ok(Self {
            state: LloydState::new(k, distance)?,
            seeding: Seeding::default(),
            rng: StdRng::from_os_rng(),
            threads,
            pool: Arc::new(pool),
        })
    }

    pub fn with_seeding(mut self, seeding: Seeding) -> Self {
        self.seeding = seeding;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn threads(&self) -> usize {
        self.threads
    }
}

impl ClusteringEngine for ParallelKMeans {
    fn add(&mut self, doc: DocId, features: &LocalFeatureSet) -> Result<()> {
        self.state.pool.add(doc, features)
    }

    fn feature_count(&self) -> usize {
        self.state.pool.len()
    }

    fn num_clusters(&self) -> usize {
        self.state.k
    }

    fn init(&mut self) -> Result<()> {
        self.state.init(self.seeding, &mut self.rng)
    }

    fn step(&mut self) -> Result<f64> {
        self.state.ensure_initialized()?;
        let n = self.state.pool.len();
        let chunk = n.div_ceil(self.threads).max(1);
        let state = &self.state;

        let partials: Vec<Partial> = self.pool.install(|| {
            (0..self.threads)
                .into_par_iter()
                .map(|t| {
                    let start = (t * chunk).min(n);
                    let end = ((t + 1) * chunk).min(n);
                    state.assign_range(start..end)
                })
                .collect()
        });

        let mut partials = partials.into_iter();
        let Some(mut totals) = partials.next() else {
            return Err(Error::Internal("no partial sums produced".to_string()));
        };
        for p in partials {
            totals.merge(&p);
        }
        Ok(self.state.apply(totals))
    }

    fn centers(&self) -> Result<Vocabulary> {
        self.state.vocabulary()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clustering::KMeans;

    fn grid() -> Vec<LocalFeatureSet> {
        (0..4)
            .map(|d| {
                let features = (0..25)
                    .map(|i| vec![(d * 40) as f64 + (i % 5) as f64, (i / 5) as f64])
                    .collect();
                LocalFeatureSet::from_features(features).unwrap()
            })
            .collect()
    }

    #[test]
    fn test_matches_single_threaded() {
        let mut single = KMeans::new(4, Distance::Euclidean).unwrap().with_seed(11);
        let mut parallel = ParallelKMeans::new(4, Distance::Euclidean, 3)
            .unwrap()
            .with_seed(11);
        for (doc, set) in grid().iter().enumerate() {
            single.add(doc as DocId, set).unwrap();
            parallel.add(doc as DocId, set).unwrap();
        }
        single.init().unwrap();
        parallel.init().unwrap();

        for _ in 0..4 {
            let a = single.step().unwrap();
            let b = parallel.step().unwrap();
            assert!((a - b).abs() < 1e-6, "stress {a} vs {b}");
        }

        let a = single.centers().unwrap();
        let b = parallel.centers().unwrap();
        for (ca, cb) in a.clusters().iter().zip(b.clusters()) {
            assert_eq!(ca.members(), cb.members());
            for (x, y) in ca.mean().iter().zip(cb.mean()) {
                assert!((x - y).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_more_threads_than_features() {
        let mut km = ParallelKMeans::new(2, Distance::Euclidean, 8)
            .unwrap()
            .with_seed(5);
        let set = LocalFeatureSet::from_features(vec![vec![0.0], vec![1.0], vec![10.0]]).unwrap();
        km.add(0, &set).unwrap();
        km.init().unwrap();
        km.step().unwrap();
        let vocab = km.centers().unwrap();
        let total: u64 = vocab.clusters().iter().map(|c| c.members()).sum();
        assert_eq!(total, 3);
        assert_eq!(km.threads(), 8);
    }
}
