//! K-means clustering of local features into a vocabulary
//!
//! Engines follow an incremental contract: features are added document
//! by document, `init` seeds the centroids, each `step` runs one Lloyd
//! iteration and returns the stress, and `centers` snapshots the result
//! as a [`Vocabulary`]. The caller owns the iteration loop, normally via
//! [`run_to_convergence`].

mod kmeans;
mod lloyd;
mod parallel;

pub use kmeans::KMeans;
pub use parallel::ParallelKMeans;

use serde::{Deserialize, Serialize};

use crate::DocId;
use crate::error::Result;
use crate::features::{Distance, LocalFeatureSet};
use crate::progress::CancellationToken;
use crate::structures::Vocabulary;

/// Incremental k-means engine
pub trait ClusteringEngine: Send {
    /// Add the local features of one document
    fn add(&mut self, doc: DocId, features: &LocalFeatureSet) -> Result<()>;

    /// Number of features added so far
    fn feature_count(&self) -> usize;

    fn num_clusters(&self) -> usize;

    /// Seed the centroids
    ///
    /// Fails with `InsufficientFeatures` when fewer than `k` features
    /// were added.
    fn init(&mut self) -> Result<()>;

    /// One Lloyd iteration; returns the total distance of every feature
    /// to its assigned centroid
    fn step(&mut self) -> Result<f64>;

    fn centers(&self) -> Result<Vocabulary>;
}

/// How initial centroids are chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Seeding {
    /// k distinct features chosen uniformly
    #[default]
    Random,
    /// k-means++ D² weighting
    #[serde(rename = "kmeans++", alias = "kmeans_plus_plus")]
    KMeansPlusPlus,
}

impl std::str::FromStr for Seeding {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "random" => Ok(Seeding::Random),
            "kmeans++" | "kmeanspp" | "plusplus" => Ok(Seeding::KMeansPlusPlus),
            other => Err(crate::Error::Config(format!("unknown seeding '{other}'"))),
        }
    }
}

/// Engine selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    Single,
    /// Rayon pool with the given thread count, 0 for one per CPU
    Parallel { threads: usize },
    /// Rayon pool with one thread per CPU
    #[default]
    Auto,
}

impl EngineKind {
    pub fn build(
        self,
        k: usize,
        distance: Distance,
        seeding: Seeding,
        seed: Option<u64>,
    ) -> Result<Box<dyn ClusteringEngine>> {
        let engine: Box<dyn ClusteringEngine> = match self {
            EngineKind::Single => {
                let km = KMeans::new(k, distance)?.with_seeding(seeding);
                Box::new(match seed {
                    Some(seed) => km.with_seed(seed),
                    None => km,
                })
            }
            EngineKind::Parallel { threads } => {
                Box::new(Self::parallel(k, distance, seeding, seed, threads)?)
            }
            EngineKind::Auto => Box::new(Self::parallel(k, distance, seeding, seed, 0)?),
        };
        Ok(engine)
    }

    fn parallel(
        k: usize,
        distance: Distance,
        seeding: Seeding,
        seed: Option<u64>,
        threads: usize,
    ) -> Result<ParallelKMeans> {
        let threads = if threads == 0 {
            num_cpus::get()
        } else {
            threads
        };
        let km = ParallelKMeans::new(k, distance, threads)?.with_seeding(seeding);
        Ok(match seed {
            Some(seed) => km.with_seed(seed),
            None => km,
        })
    }
}

impl std::str::FromStr for EngineKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.to_ascii_lowercase();
        match lower.as_str() {
            "single" => Ok(EngineKind::Single),
            "parallel" | "auto" => Ok(EngineKind::Auto),
            other => match other.strip_prefix("parallel:").map(str::parse::<usize>) {
                Some(Ok(threads)) => Ok(EngineKind::Parallel { threads }),
                _ => Err(crate::Error::Config(format!("unknown engine '{other}'"))),
            },
        }
    }
}

/// Stopping rule for the Lloyd iterations
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Convergence {
    pub min_steps: usize,
    pub max_steps: usize,
    /// Lower bound of the stress-delta threshold
    pub min_threshold: f64,
    /// Threshold grows by one per this many features
    pub features_per_unit: f64,
}

impl Default for Convergence {
    fn default() -> Self {
        Self {
            min_steps: 2,
            max_steps: 12,
            min_threshold: 20.0,
            features_per_unit: 1000.0,
        }
    }
}

impl Convergence {
    pub fn threshold(&self, feature_count: usize) -> f64 {
        (feature_count as f64 / self.features_per_unit).max(self.min_threshold)
    }
}

/// Outcome of a clustering run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusteringReport {
    pub steps: usize,
    /// Stress after each step
    pub stress: Vec<f64>,
    /// The stress delta fell under the threshold before `max_steps`
    pub converged: bool,
    pub feature_count: usize,
}

/// Seed `engine` and iterate until the stress settles
///
/// `on_step` receives the step number (from 1) and its stress.
pub fn run_to_convergence(
    engine: &mut dyn ClusteringEngine,
    policy: &Convergence,
    cancel: &CancellationToken,
    mut on_step: impl FnMut(usize, f64),
) -> Result<ClusteringReport> {
    let feature_count = engine.feature_count();
    let threshold = policy.threshold(feature_count);
    let max_steps = policy.max_steps.max(policy.min_steps).max(1);

    cancel.check()?;
    engine.init()?;

    let mut stress = Vec::with_capacity(max_steps);
    let mut converged = false;
    while stress.len() < max_steps {
        cancel.check()?;
        let s = engine.step()?;
        stress.push(s);
        on_step(stress.len(), s);

        let n = stress.len();
        if n >= policy.min_steps.max(2) && (stress[n - 1] - stress[n - 2]).abs() <= threshold {
            converged = true;
            break;
        }
    }

    log::info!(
        "Clustering of {} features into {} clusters finished after {} steps (converged: {}, threshold: {:.1})",
        feature_count,
        engine.num_clusters(),
        stress.len(),
        converged,
        threshold
    );

    Ok(ClusteringReport {
        steps: stress.len(),
        stress,
        converged,
        feature_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    /// Engine replaying a fixed stress sequence
    struct Scripted {
        stress: Vec<f64>,
        calls: usize,
        features: usize,
    }

    impl ClusteringEngine for Scripted {
        fn add(&mut self, _doc: DocId, features: &LocalFeatureSet) -> Result<()> {
            self.features += features.len();
            Ok(())
        }
        fn feature_count(&self) -> usize {
            self.features
        }
        fn num_clusters(&self) -> usize {
            1
        }
        fn init(&mut self) -> Result<()> {
            Ok(())
        }
        fn step(&mut self) -> Result<f64> {
            let s = self.stress[self.calls.min(self.stress.len() - 1)];
            self.calls += 1;
            Ok(s)
        }
        fn centers(&self) -> Result<Vocabulary> {
            Err(Error::Internal("scripted".to_string()))
        }
    }

    fn scripted(stress: &[f64]) -> Scripted {
        Scripted {
            stress: stress.to_vec(),
            calls: 0,
            features: 10,
        }
    }

    #[test]
    fn test_runs_at_least_two_steps() {
        let mut engine = scripted(&[5.0, 5.0, 5.0]);
        let report = run_to_convergence(
            &mut engine,
            &Convergence::default(),
            &CancellationToken::new(),
            |_, _| {},
        )
        .unwrap();
        assert_eq!(report.steps, 2);
        assert!(report.converged);
    }

    #[test]
    fn test_stops_after_max_steps() {
        let stress: Vec<f64> = (0..20).map(|i| 10_000.0 - i as f64 * 100.0).collect();
        let mut engine = scripted(&stress);
        let mut seen = Vec::new();
        let report = run_to_convergence(
            &mut engine,
            &Convergence::default(),
            &CancellationToken::new(),
            |step, _| seen.push(step),
        )
        .unwrap();
        assert_eq!(report.steps, 12);
        assert!(!report.converged);
        assert_eq!(seen, (1..=12).collect::<Vec<_>>());
    }

    #[test]
    fn test_threshold_scales_with_features() {
        let policy = Convergence::default();
        assert_eq!(policy.threshold(500), 20.0);
        assert_eq!(policy.threshold(100_000), 100.0);
    }

    #[test]
    fn test_cancelled_before_init() {
        let mut engine = scripted(&[1.0]);
        let token = CancellationToken::new();
        token.cancel();
        let err = run_to_convergence(&mut engine, &Convergence::default(), &token, |_, _| {})
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert_eq!(engine.calls, 0);
    }

    #[test]
    fn test_parse_engine_and_seeding() {
        assert_eq!("single".parse::<EngineKind>().unwrap(), EngineKind::Single);
        assert_eq!(
            "parallel:3".parse::<EngineKind>().unwrap(),
            EngineKind::Parallel { threads: 3 }
        );
        assert!("gpu".parse::<EngineKind>().is_err());
        assert_eq!(
            "kmeans++".parse::<Seeding>().unwrap(),
            Seeding::KMeansPlusPlus
        );
    }

    #[test]
    fn test_real_engine_converges_with_k_centroids() {
        let mut engine = EngineKind::Single
            .build(3, Distance::Euclidean, Seeding::KMeansPlusPlus, Some(9))
            .unwrap();
        for doc in 0..3u32 {
            let features = (0..20)
                .map(|i| vec![doc as f64 * 100.0 + (i % 4) as f64, (i / 4) as f64])
                .collect();
            engine
                .add(doc, &LocalFeatureSet::from_features(features).unwrap())
                .unwrap();
        }
        let report = run_to_convergence(
            engine.as_mut(),
            &Convergence::default(),
            &CancellationToken::new(),
            |_, _| {},
        )
        .unwrap();
        assert!(report.steps >= 2 && report.steps <= 12);
        assert_eq!(report.feature_count, 60);
        assert_eq!(engine.centers().unwrap().num_clusters(), 3);
    }
}
