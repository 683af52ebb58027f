//! Lloyd iteration state shared by the k-means engines

use std::ops::Range;

use rand::Rng;
use rand::rngs::StdRng;
use rand::seq::index::sample;

use super::Seeding;
use crate::DocId;
use crate::error::{Error, Result};
use crate::features::{Distance, LocalFeatureSet};
use crate::structures::{Cluster, Vocabulary};

/// Local features collected for clustering, grouped by source document
#[derive(Debug, Default)]
pub(crate) struct FeaturePool {
    /// Row-major `len × dim`
    data: Vec<f64>,
    dim: usize,
    docs: Vec<(DocId, Range<usize>)>,
}

impl FeaturePool {
    pub(crate) fn add(&mut self, doc: DocId, features: &LocalFeatureSet) -> Result<()> {
        let Some(dim) = features.dim() else {
            return Ok(());
        };
        if self.dim == 0 {
            self.dim = dim;
        } else if self.dim != dim {
            return Err(Error::DimensionMismatch {
                expected: self.dim,
                got: dim,
            });
        }
        let start = self.len();
        for f in features.iter() {
            self.data.extend_from_slice(f);
        }
        self.docs.push((doc, start..self.len()));
        Ok(())
    }

    pub(crate) fn len(&self) -> usize {
        if self.dim == 0 {
            0
        } else {
            self.data.len() / self.dim
        }
    }

    pub(crate) fn dim(&self) -> usize {
        self.dim
    }

    pub(crate) fn num_docs(&self) -> usize {
        self.docs.len()
    }

    #[inline]
    pub(crate) fn get(&self, idx: usize) -> &[f64] {
        let start = idx * self.dim;
        &self.data[start..start + self.dim]
    }
}

/// Partial sums from assigning one range of features
pub(crate) struct Partial {
    sums: Vec<f64>,
    counts: Vec<u64>,
    stress: f64,
}

impl Partial {
    fn zeros(k: usize, dim: usize) -> Self {
        Self {
            sums: vec![0.0; k * dim],
            counts: vec![0; k],
            stress: 0.0,
        }
    }

    /// Fold `other` into `self`; called on the coordinating thread only
    pub(crate) fn merge(&mut self, other: &Partial) {
        for (a, b) in self.sums.iter_mut().zip(&other.sums) {
            *a += b;
        }
        for (a, b) in self.counts.iter_mut().zip(&other.counts) {
            *a += b;
        }
        self.stress += other.stress;
    }
}

/// Centroids plus the features they are fitted to
pub(crate) struct LloydState {
    pub(crate) k: usize,
    pub(crate) distance: Distance,
    pub(crate) pool: FeaturePool,
    centroids: Vec<Vec<f64>>,
    members: Vec<u64>,
}

impl LloydState {
    pub(crate) fn new(k: usize, distance: Distance) -> Result<Self> {
        if k == 0 {
            return Err(Error::Config(
                "number of clusters must be greater than 0".to_string(),
            ));
        }
        Ok(Self {
            k,
            distance,
            pool: FeaturePool::default(),
            centroids: Vec::new(),
            members: Vec::new(),
        })
    }

    pub(crate) fn is_initialized(&self) -> bool {
        !self.centroids.is_empty()
    }

    pub(crate) fn init(&mut self, seeding: Seeding, rng: &mut StdRng) -> Result<()> {
        let n = self.pool.len();
        if n < self.k {
            return Err(Error::InsufficientFeatures {
                needed: self.k,
                available: n,
            });
        }
        self.centroids = match seeding {
            Seeding::Random => self.seed_random(rng),
            Seeding::KMeansPlusPlus => self.seed_plus_plus(rng),
        };
        self.members = vec![0; self.k];
        log::debug!(
            "Seeded {} centroids ({:?}) from {} features of {} documents",
            self.k,
            seeding,
            n,
            self.pool.num_docs()
        );
        Ok(())
    }

    /// k distinct feature rows chosen uniformly
    fn seed_random(&self, rng: &mut StdRng) -> Vec<Vec<f64>> {
        sample(rng, self.pool.len(), self.k)
            .into_iter()
            .map(|i| self.pool.get(i).to_vec())
            .collect()
    }

    /// k-means++: each further seed drawn with probability ∝ D(x)²
    fn seed_plus_plus(&self, rng: &mut StdRng) -> Vec<Vec<f64>> {
        let n = self.pool.len();
        let mut centroids = Vec::with_capacity(self.k);
        centroids.push(self.pool.get(rng.random_range(0..n)).to_vec());

        let mut nearest_sq: Vec<f64> = (0..n)
            .map(|i| {
                let d = self.distance.eval(self.pool.get(i), &centroids[0]);
                d * d
            })
            .collect();

        while centroids.len() < self.k {
            let total: f64 = nearest_sq.iter().sum();
            let next = if total > 0.0 {
                let threshold = rng.random::<f64>() * total;
                let mut cumulative = 0.0;
                let mut chosen = n - 1;
                for (i, &d) in nearest_sq.iter().enumerate() {
                    cumulative += d;
                    if cumulative >= threshold && d > 0.0 {
                        chosen = i;
                        break;
                    }
                }
                chosen
            } else {
                // Every remaining point coincides with a seed
                rng.random_range(0..n)
            };

            let centroid = self.pool.get(next).to_vec();
            for (i, slot) in nearest_sq.iter_mut().enumerate() {
                let d = self.distance.eval(self.pool.get(i), &centroid);
                *slot = slot.min(d * d);
            }
            centroids.push(centroid);
        }
        centroids
    }

    /// Assign features in `range` to their nearest centroid
    pub(crate) fn assign_range(&self, range: Range<usize>) -> Partial {
        let dim = self.pool.dim();
        let mut partial = Partial::zeros(self.k, dim);
        for i in range {
            let feature = self.pool.get(i);
            let mut best = 0;
            let mut best_dist = f64::INFINITY;
            for (c, centroid) in self.centroids.iter().enumerate() {
                let d = self.distance.eval(feature, centroid);
                if d < best_dist {
                    best_dist = d;
                    best = c;
                }
            }
            partial.stress += best_dist;
            partial.counts[best] += 1;
            let sums = &mut partial.sums[best * dim..(best + 1) * dim];
            for (s, &v) in sums.iter_mut().zip(feature) {
                *s += v;
            }
        }
        partial
    }

    /// Replace centroids by the means of their members
    ///
    /// A cluster that received no features keeps its previous centroid.
    pub(crate) fn apply(&mut self, totals: Partial) -> f64 {
        let dim = self.pool.dim();
        for (c, centroid) in self.centroids.iter_mut().enumerate() {
            let count = totals.counts[c];
            if count == 0 {
                continue;
            }
            let sums = &totals.sums[c * dim..(c + 1) * dim];
            for (m, &s) in centroid.iter_mut().zip(sums) {
                *m = s / count as f64;
            }
        }
        self.members = totals.counts;
        totals.stress
    }

    pub(crate) fn ensure_initialized(&self) -> Result<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(Error::Internal(
                "clustering engine used before init()".to_string(),
            ))
        }
    }

    pub(crate) fn vocabulary(&self) -> Result<Vocabulary> {
        self.ensure_initialized()?;
        let clusters = self
            .centroids
            .iter()
            .zip(&self.members)
            .map(|(mean, &members)| Cluster::new(mean.clone(), members))
            .collect();
        Vocabulary::new(clusters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn pool_state(points: &[[f64; 2]], k: usize) -> LloydState {
        let mut state = LloydState::new(k, Distance::Euclidean).unwrap();
        let set =
            LocalFeatureSet::from_features(points.iter().map(|p| p.to_vec()).collect()).unwrap();
        state.pool.add(0, &set).unwrap();
        state
    }

    #[test]
    fn test_pool_groups_by_document() {
        let mut pool = FeaturePool::default();
        let a = LocalFeatureSet::from_features(vec![vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
        let b = LocalFeatureSet::from_features(vec![vec![5.0, 6.0]]).unwrap();
        pool.add(7, &a).unwrap();
        pool.add(9, &LocalFeatureSet::new()).unwrap();
        pool.add(8, &b).unwrap();

        assert_eq!(pool.len(), 3);
        assert_eq!(pool.num_docs(), 2);
        assert_eq!(pool.get(2), &[5.0, 6.0]);

        let c = LocalFeatureSet::from_features(vec![vec![1.0]]).unwrap();
        assert!(matches!(
            pool.add(1, &c),
            Err(Error::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_plus_plus_seeds_are_distinct_points() {
        let state = pool_state(&[[0.0, 0.0], [0.0, 0.0], [10.0, 0.0], [0.0, 10.0]], 3);
        let mut rng = StdRng::seed_from_u64(3);
        let seeds = state.seed_plus_plus(&mut rng);
        assert_eq!(seeds.len(), 3);
        for (i, a) in seeds.iter().enumerate() {
            for b in &seeds[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_empty_cluster_keeps_centroid() {
        let mut state = pool_state(&[[0.0, 0.0], [1.0, 0.0]], 2);
        state.centroids = vec![vec![0.5, 0.0], vec![100.0, 100.0]];
        state.members = vec![0, 0];
        let partial = state.assign_range(0..2);
        let stress = state.apply(partial);

        assert_eq!(stress, 1.0);
        assert_eq!(state.centroids[0], vec![0.5, 0.0]);
        assert_eq!(state.centroids[1], vec![100.0, 100.0]);
        assert_eq!(state.members, vec![2, 0]);
    }

    #[test]
    fn test_merged_partials_match_single_pass() {
        let points: Vec<[f64; 2]> = (0..10).map(|i| [i as f64, (i % 3) as f64]).collect();
        let mut state = pool_state(&points, 2);
        state.centroids = vec![vec![0.0, 0.0], vec![9.0, 0.0]];

        let whole = state.assign_range(0..10);
        let mut merged = state.assign_range(0..4);
        merged.merge(&state.assign_range(4..10));

        assert_eq!(whole.counts, merged.counts);
        assert!((whole.stress - merged.stress).abs() < 1e-9);
        for (a, b) in whole.sums.iter().zip(&merged.sums) {
            assert!((a - b).abs() < 1e-9);
        }
    }
}
