//! Vocabulary construction and document encoding
//!
//! [`VocabularyBuilder`] drives the whole pipeline over a
//! [`DocumentStore`]:
//! - `build_vocabulary_and_encode` samples documents, clusters their local
//!   features (or loads a codebook), persists the vocabulary, then encodes
//!   every document with a fixed pool of scoped worker threads
//! - `encode_missing_only` encodes documents that have no encoding yet
//! - `encode_single_document` encodes one document without touching the store
//!
//! Fatal errors roll the store back to its last commit.

mod config;
mod partition;

#[cfg(test)]
mod tests;

pub use config::{BuilderConfig, VocabularySource};
pub use partition::partitions;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::thread;
use std::time::Instant;

use parking_lot::Mutex;

use crate::DocId;
use crate::clustering::{ClusteringReport, run_to_convergence};
use crate::document::{Document, FieldValue};
use crate::encoder::{EncodedDescriptor, Encoder};
use crate::error::{DocumentFailure, Error, Result};
use crate::features::{CodecFactory, Distance};
use crate::progress::{
    CancellationToken, Phase, ProgressReporter, ProgressTracker, ReporterThread, percent_of,
};
use crate::sampler::VocabularySampler;
use crate::store::DocumentStore;
use crate::structures::{Vocabulary, VocabularyKey};
use partition::{EncodePass, WorkerOutcome};

/// Summary of one pass
#[derive(Debug, Default)]
pub struct IndexingReport {
    /// Vocabulary file used by the pass
    pub vocabulary_path: PathBuf,
    /// Hex fingerprint of that vocabulary
    pub fingerprint: String,
    /// Present when the pass ran k-means
    pub clustering: Option<ClusteringReport>,
    pub sampled_docs: usize,
    pub encoded: usize,
    /// Deleted or already encoded documents
    pub skipped: usize,
    pub failures: Vec<DocumentFailure>,
    pub elapsed_ms: u64,
}

impl IndexingReport {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}

/// Builds vocabularies and encodes the documents of one store
pub struct VocabularyBuilder<S: DocumentStore> {
    store: S,
    config: BuilderConfig,
    key: VocabularyKey,
    codec: CodecFactory,
    distance: Distance,
    reporter: Option<Arc<dyn ProgressReporter>>,
    cancel: CancellationToken,
    /// Vocabulary loaded for missing-only and single-document encoding
    cached: Mutex<Option<Arc<Vocabulary>>>,
}

impl<S: DocumentStore> VocabularyBuilder<S> {
    /// Validates `config` before any I/O
    pub fn new(store: S, config: BuilderConfig, codec: CodecFactory) -> Result<Self> {
        config.validate()?;
        let key = config.key()?;
        let distance = codec().distance();
        Ok(Self {
            store,
            config,
            key,
            codec,
            distance,
            reporter: None,
            cancel: CancellationToken::new(),
            cached: Mutex::new(None),
        })
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &BuilderConfig {
        &self.config
    }

    pub fn key(&self) -> &VocabularyKey {
        &self.key
    }

    /// Where this builder's vocabulary file lives
    pub fn vocabulary_path(&self) -> PathBuf {
        self.key.path_in(&self.config.vocabulary_dir)
    }

    fn report(&self, phase: Phase, percent: u8) {
        if let Some(ref reporter) = self.reporter {
            reporter.report(phase, percent);
        }
    }

    /// Build the vocabulary, then encode every document and commit
    pub fn build_vocabulary_and_encode(&self) -> Result<IndexingReport> {
        let started = Instant::now();
        let result = self.build_and_encode_inner(started);
        if let Err(ref e) = result {
            log::warn!("Vocabulary build aborted: {}", e);
            self.store.rollback()?;
        }
        result
    }

    fn build_and_encode_inner(&self, started: Instant) -> Result<IndexingReport> {
        self.cancel.check()?;
        let mut report = IndexingReport::default();

        let vocabulary = match &self.config.source {
            VocabularySource::Cluster => {
                let (vocabulary, sampled, clustering) = self.cluster()?;
                report.sampled_docs = sampled;
                report.clustering = Some(clustering);
                vocabulary
            }
            VocabularySource::Codebook { path } => self.load_codebook(path)?,
        };
        self.check_dim(&vocabulary)?;
        self.cancel.check()?;

        let path = self.vocabulary_path();
        self.report(Phase::WritingVocabulary, 0);
        vocabulary.save(&path)?;
        self.report(Phase::WritingVocabulary, 100);
        log::info!(
            "Wrote vocabulary {} ({} clusters, dim {}, fingerprint {})",
            path.display(),
            vocabulary.num_clusters(),
            vocabulary.dim(),
            vocabulary.fingerprint_hex()
        );

        let vocabulary = Arc::new(vocabulary);
        *self.cached.lock() = Some(Arc::clone(&vocabulary));

        let outcome = self.encode_all(&vocabulary)?;
        self.finish(outcome, &mut report, true)?;

        report.vocabulary_path = path;
        report.fingerprint = vocabulary.fingerprint_hex();
        report.elapsed_ms = started.elapsed().as_millis() as u64;
        log::info!(
            "Encoded {} documents ({} skipped, {} failed) in {}ms",
            report.encoded,
            report.skipped,
            report.failed(),
            report.elapsed_ms
        );
        Ok(report)
    }

    /// Sample documents and run k-means over their features
    fn cluster(&self) -> Result<(Vocabulary, usize, ClusteringReport)> {
        let codec = (self.codec)();

        self.report(Phase::Sampling, 0);
        let ids = VocabularySampler::new(&self.store, codec.field_name(), self.config.seed)
            .select(self.config.sample_docs)?;
        self.report(Phase::Sampling, 100);
        log::info!(
            "Sampled {} documents for a {}-cluster {} vocabulary",
            ids.len(),
            self.config.num_clusters,
            self.key.encoding.name()
        );

        let mut engine = self.config.engine.build(
            self.config.num_clusters,
            codec.distance(),
            self.config.seeding,
            self.config.seed,
        )?;
        for &id in &ids {
            self.cancel.check()?;
            let values = self.store.get_field_values(id, codec.field_name())?;
            match codec.decode_all(&values) {
                Ok(features) => engine.add(id, &features)?,
                Err(e) => log::warn!("Skipping document {} for clustering: {}", id, e),
            }
        }

        let max_steps = self.config.convergence.max_steps;
        let clustering = run_to_convergence(
            engine.as_mut(),
            &self.config.convergence,
            &self.cancel,
            |step, stress| {
                log::debug!("Clustering step {}: stress {:.3}", step, stress);
                self.report(Phase::Clustering, percent_of(step, max_steps));
            },
        )?;
        self.report(Phase::Clustering, 100);

        Ok((engine.centers()?, ids.len(), clustering))
    }

    fn load_codebook(&self, path: &Path) -> Result<Vocabulary> {
        let vocabulary = Vocabulary::load(path)?;
        if vocabulary.num_clusters() != self.config.num_clusters {
            return Err(Error::Config(format!(
                "codebook {} has {} clusters, configured {}",
                path.display(),
                vocabulary.num_clusters(),
                self.config.num_clusters
            )));
        }
        log::info!(
            "Using codebook {} ({} clusters)",
            path.display(),
            vocabulary.num_clusters()
        );
        Ok(vocabulary)
    }

    fn check_dim(&self, vocabulary: &Vocabulary) -> Result<()> {
        match (self.codec)().dim() {
            Some(expected) if expected != vocabulary.dim() => Err(Error::DimensionMismatch {
                expected,
                got: vocabulary.dim(),
            }),
            _ => Ok(()),
        }
    }

    fn encoder<'v>(&self, vocabulary: &'v Vocabulary) -> Encoder<'v> {
        Encoder::new(vocabulary, self.key.encoding, self.distance)
            .with_quantize(self.config.quantize)
    }

    /// Fan the id space out over scoped workers and join them all
    fn encode_all(&self, vocabulary: &Vocabulary) -> Result<WorkerOutcome> {
        let total: DocId = self.store.max_doc()?;
        let workers = self.config.workers();
        let ranges = partitions(total, workers);
        let fields = self.key.fields();
        let tracker = ProgressTracker::new(total as usize);
        let stop = AtomicBool::new(false);

        let pass = EncodePass {
            store: &self.store,
            codec: &self.codec,
            encoder: self.encoder(vocabulary),
            fields: &fields,
            id_field: &self.config.id_field,
            discard_raw: self.config.discard_raw,
            tracker: &tracker,
            cancel: &self.cancel,
        };

        log::info!("Encoding {} documents with {} workers", total, workers);
        self.report(Phase::Encoding, 0);

        let results: Vec<Result<WorkerOutcome>> = thread::scope(|s| {
            let reporter = self.reporter.as_deref().map(|r| {
                ReporterThread::spawn(
                    s,
                    Phase::Encoding,
                    &tracker,
                    r,
                    self.config.progress_interval(),
                    &stop,
                )
            });

            let handles: Vec<_> = ranges
                .into_iter()
                .map(|range| {
                    let pass = &pass;
                    s.spawn(move || pass.run_range(range))
                })
                .collect();
            let results = handles
                .into_iter()
                .map(|h| {
                    h.join()
                        .unwrap_or_else(|_| Err(Error::Internal("encoding worker panicked".into())))
                })
                .collect();

            if let Some(reporter) = reporter {
                reporter.finish();
            }
            results
        });

        let mut outcome = WorkerOutcome::default();
        for result in results {
            outcome.absorb(result?);
        }
        Ok(outcome)
    }

    /// Commit, or roll back when failures must abort the pass
    fn finish(
        &self,
        outcome: WorkerOutcome,
        report: &mut IndexingReport,
        compact: bool,
    ) -> Result<()> {
        let WorkerOutcome {
            encoded,
            skipped,
            mut failures,
        } = outcome;
        failures.sort_by_key(|f| f.doc);

        if !failures.is_empty() && self.config.abort_on_failure {
            self.store.rollback()?;
            return Err(Error::EncodingFailed {
                failures: failures.len(),
            });
        }

        self.cancel.check()?;
        self.report(Phase::Committing, 0);
        self.store.commit()?;
        if compact {
            self.store.compact()?;
        }
        self.report(Phase::Committing, 100);

        report.encoded = encoded;
        report.skipped = skipped;
        report.failures = failures;
        Ok(())
    }

    /// Persisted vocabulary for this builder's key, loaded once
    ///
    /// A codebook-sourced builder falls back to the codebook file when no
    /// build has copied it under the key's name yet.
    pub fn vocabulary(&self) -> Result<Arc<Vocabulary>> {
        let mut cached = self.cached.lock();
        if let Some(ref vocabulary) = *cached {
            return Ok(Arc::clone(vocabulary));
        }

        let path = self.vocabulary_path();
        let vocabulary = match (Vocabulary::load(&path), &self.config.source) {
            (Err(Error::VocabularyNotFound(_)), VocabularySource::Codebook { path }) => {
                self.load_codebook(path)?
            }
            (result, _) => result?,
        };
        self.check_dim(&vocabulary)?;
        log::debug!(
            "Loaded vocabulary {} (fingerprint {})",
            path.display(),
            vocabulary.fingerprint_hex()
        );

        let vocabulary = Arc::new(vocabulary);
        *cached = Some(Arc::clone(&vocabulary));
        Ok(vocabulary)
    }

    /// Forget the loaded vocabulary so the next call reads the file again
    pub fn invalidate_vocabulary(&self) {
        *self.cached.lock() = None;
    }

    /// Encode documents without an encoding, on the calling thread
    pub fn encode_missing_only(&self) -> Result<IndexingReport> {
        let started = Instant::now();
        let result = self.encode_missing_inner(started);
        if let Err(ref e) = result {
            log::warn!("Missing-only pass aborted: {}", e);
            self.store.rollback()?;
        }
        result
    }

    fn encode_missing_inner(&self, started: Instant) -> Result<IndexingReport> {
        let vocabulary = self.vocabulary()?;
        let fingerprint = vocabulary.fingerprint_hex();
        let fields = self.key.fields();
        let entries = self.store.list_documents()?;
        let tracker = ProgressTracker::new(entries.len());
        let codec = (self.codec)();

        let pass = EncodePass {
            store: &self.store,
            codec: &self.codec,
            encoder: self.encoder(&vocabulary),
            fields: &fields,
            id_field: &self.config.id_field,
            discard_raw: self.config.discard_raw,
            tracker: &tracker,
            cancel: &self.cancel,
        };

        let mut outcome = WorkerOutcome::default();
        let mut last_percent = None;
        for entry in entries {
            self.cancel.check()?;
            tracker.advance(1);
            let percent = tracker.percent();
            if last_percent != Some(percent) {
                self.report(Phase::Encoding, percent);
                last_percent = Some(percent);
            }

            let doc = match self.store.get_document(entry.id) {
                Ok(Some(doc)) => doc,
                Ok(None) => {
                    outcome.skipped += 1;
                    continue;
                }
                Err(e) => {
                    outcome.record(entry.id, Err(e));
                    continue;
                }
            };

            // Featureless BOVW documents keep an empty token text; the
            // fingerprint marks them as encoded
            let missing = doc.is_field_empty(&fields.visual_words)
                && doc.is_field_empty(&fields.fingerprint);
            let stale = self.config.reencode_stale
                && doc
                    .get_first(&fields.fingerprint)
                    .and_then(FieldValue::as_text)
                    != Some(fingerprint.as_str());
            if missing || stale {
                outcome.record(entry.id, pass.encode_document(codec.as_ref(), entry.id, doc));
            } else {
                outcome.skipped += 1;
            }
        }

        let mut report = IndexingReport::default();
        self.finish(outcome, &mut report, false)?;
        report.vocabulary_path = self.vocabulary_path();
        report.fingerprint = fingerprint;
        report.elapsed_ms = started.elapsed().as_millis() as u64;
        log::info!(
            "Missing-only pass encoded {} documents ({} skipped, {} failed)",
            report.encoded,
            report.skipped,
            report.failed()
        );
        Ok(report)
    }

    /// Encode one document against the persisted vocabulary
    pub fn encode_single_document(&self, doc: &Document) -> Result<EncodedDescriptor> {
        let vocabulary = self.vocabulary()?;
        let codec = (self.codec)();
        let values: Vec<Vec<u8>> = doc
            .get_all(codec.field_name())
            .map(FieldValue::to_bytes)
            .collect();
        let features = codec.decode_all(&values)?;
        self.encoder(&vocabulary).encode(&features)
    }
}
