//! Configuration for vocabulary builds

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::clustering::{Convergence, EngineKind, Seeding};
use crate::error::{Error, Result};
use crate::structures::{EncodingKind, VocabularyKey};

/// Where the vocabulary comes from
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VocabularySource {
    /// Sample documents and run k-means
    #[default]
    Cluster,
    /// Reuse the clusters of an existing vocabulary file
    Codebook { path: PathBuf },
}

/// Configuration for [`VocabularyBuilder`](super::VocabularyBuilder)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderConfig {
    pub encoding: EncodingKind,
    /// Feature type tag, part of the vocabulary key
    pub feature: String,
    /// Keypoint detector tag, part of the vocabulary key
    pub detector: String,
    /// Number of clusters (visual words)
    pub num_clusters: usize,
    /// Documents sampled for clustering, `None` for half the collection
    pub sample_docs: Option<usize>,
    /// Encoding workers, `None` for the encoding's default
    pub workers: Option<usize>,
    pub source: VocabularySource,
    pub seeding: Seeding,
    pub engine: EngineKind,
    pub convergence: Convergence,
    /// Seed for sampling and centroid seeding
    pub seed: Option<u64>,
    /// Rescale BOVW histograms to `[0, 128)`
    pub quantize: bool,
    /// Remove raw local features once a document is encoded
    pub discard_raw: bool,
    /// Directory holding vocabulary files
    pub vocabulary_dir: PathBuf,
    /// Unique identifier field used for updates
    pub id_field: String,
    /// Roll back and fail the pass if any document fails
    pub abort_on_failure: bool,
    /// Missing-only passes also re-encode documents built with another vocabulary
    pub reencode_stale: bool,
    /// Progress reporter period in milliseconds
    pub progress_interval_ms: u64,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            encoding: EncodingKind::Bovw,
            feature: "surf".to_string(),
            detector: "dog".to_string(),
            num_clusters: 512,
            sample_docs: Some(500),
            workers: None,
            source: VocabularySource::Cluster,
            seeding: Seeding::Random,
            engine: EngineKind::Auto,
            convergence: Convergence::default(),
            seed: None,
            quantize: false,
            discard_raw: false,
            vocabulary_dir: PathBuf::from("vocabularies"),
            id_field: crate::DEFAULT_ID_FIELD.to_string(),
            abort_on_failure: false,
            reencode_stale: false,
            progress_interval_ms: 1000,
        }
    }
}

impl BuilderConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot produce a vocabulary
    pub fn validate(&self) -> Result<()> {
        if self.num_clusters == 0 {
            return Err(Error::Config(
                "num_clusters must be greater than 0".to_string(),
            ));
        }
        if self.workers == Some(0) {
            return Err(Error::Config("workers must be greater than 0".to_string()));
        }
        if self.id_field.trim().is_empty() {
            return Err(Error::Config("id_field must not be empty".to_string()));
        }
        if self.convergence.max_steps == 0 || self.convergence.features_per_unit <= 0.0 {
            return Err(Error::Config(format!(
                "invalid convergence policy {:?}",
                self.convergence
            )));
        }
        self.key().map(|_| ())
    }

    pub fn key(&self) -> Result<VocabularyKey> {
        Ok(VocabularyKey::new(
            self.encoding,
            &self.feature,
            &self.detector,
            self.num_clusters,
        )?
        .with_codebook(matches!(self.source, VocabularySource::Codebook { .. })))
    }

    pub fn workers(&self) -> usize {
        self.workers.unwrap_or_else(|| self.encoding.default_workers())
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms.max(1))
    }
}
