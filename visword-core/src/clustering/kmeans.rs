//! Single-threaded k-means

use rand::SeedableRng;
use rand::rngs::StdRng;

use super::lloyd::LloydState;
use super::{ClusteringEngine, Seeding};
use crate::DocId;
use crate::error::Result;
use crate::features::{Distance, LocalFeatureSet};
use crate::structures::Vocabulary;

/// Lloyd's algorithm on the calling thread
pub struct KMeans {
    state: LloydState,
    seeding: Seeding,
    rng: StdRng,
}

impl KMeans {
    pub fn new(k: usize, distance: Distance) -> Result<Self> {
        Ok(Self {
            state: LloydState::new(k, distance)?,
            seeding: Seeding::default(),
            rng: StdRng::from_os_rng(),
        })
    }

    pub fn with_seeding(mut self, seeding: Seeding) -> Self {
        self.seeding = seeding;
        self
    }

    /// Fix the seeding RNG for reproducible vocabularies
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }
}

impl ClusteringEngine for KMeans {
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
        let totals = self.state.assign_range(0..self.state.pool.len());
        Ok(self.state.apply(totals))
    }

    fn centers(&self) -> Result<Vocabulary> {
        self.state.vocabulary()
    }
}
