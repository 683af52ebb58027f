//! Store and vocabulary operations: ingest, build, missing, encode, vocab-info

use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use visword_core::{
    BuilderConfig, CodecFactory, CodecKind, Document, DocumentStore, FsStore, IndexingReport,
    LogReporter, Vocabulary, VocabularyBuilder,
};

/// Builder options plus the codec used to read raw features
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    #[serde(flatten)]
    pub builder: BuilderConfig,
    pub codec: CodecKind,
    /// Raw feature field, defaults to the feature tag
    pub field: Option<String>,
    /// Fixed descriptor length to enforce on decode
    pub dim: Option<usize>,
}

impl ToolConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    pub fn field(&self) -> &str {
        self.field.as_deref().unwrap_or(&self.builder.feature)
    }

    pub fn codec_factory(&self) -> CodecFactory {
        self.codec.factory(self.field(), self.dim)
    }
}

/// One line of an ingest file
#[derive(Debug, Deserialize)]
struct IngestRecord {
    id: String,
    #[serde(default)]
    features: Vec<Vec<f64>>,
    /// Extra text fields copied verbatim
    #[serde(default)]
    fields: serde_json::Map<String, serde_json::Value>,
}

pub fn open_store(path: &Path, id_field: &str) -> Result<FsStore> {
    FsStore::open(path, id_field).with_context(|| format!("Failed to open store: {:?}", path))
}

/// Add documents from a JSONL file and commit
pub fn ingest(store_path: &Path, documents: &Path, config: &ToolConfig) -> Result<usize> {
    let store = open_store(store_path, &config.builder.id_field)?;
    let codec = config.codec_factory()();
    let file = File::open(documents)
        .with_context(|| format!("Failed to open documents file: {:?}", documents))?;

    let mut count = 0usize;
    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: IngestRecord = serde_json::from_str(&line)
            .with_context(|| format!("Failed to parse line {}", line_no + 1))?;

        let mut doc = Document::new();
        doc.add_text(config.builder.id_field.as_str(), record.id);
        for feature in &record.features {
            doc.add_bytes(codec.field_name(), codec.encode(feature));
        }
        for (name, value) in record.fields {
            match value {
                serde_json::Value::String(s) => doc.add_text(name, s),
                other => doc.add_text(name, other.to_string()),
            }
        }
        store
            .add_document(doc)
            .with_context(|| format!("Failed to add document on line {}", line_no + 1))?;
        count += 1;
    }

    store.commit()?;
    info!("Ingested {} documents into {:?}", count, store_path);
    Ok(count)
}

fn builder(store_path: &Path, config: &ToolConfig) -> Result<VocabularyBuilder<FsStore>> {
    let store = open_store(store_path, &config.builder.id_field)?;
    let builder = VocabularyBuilder::new(store, config.builder.clone(), config.codec_factory())
        .context("Invalid builder configuration")?;
    Ok(builder.with_reporter(Arc::new(LogReporter)))
}

fn log_report(report: &IndexingReport) {
    if let Some(ref clustering) = report.clustering {
        info!(
            "Clustering: {} features, {} steps, converged: {}",
            clustering.feature_count, clustering.steps, clustering.converged
        );
    }
    info!(
        "Vocabulary {:?} (fingerprint {})",
        report.vocabulary_path, report.fingerprint
    );
    info!(
        "Encoded {}, skipped {}, failed {} in {}ms",
        report.encoded,
        report.skipped,
        report.failed(),
        report.elapsed_ms
    );
    for failure in &report.failures {
        warn!("Document {}: {}", failure.doc, failure.error);
    }
}

/// Build the vocabulary and encode every document
pub fn build(store_path: &Path, config: &ToolConfig) -> Result<IndexingReport> {
    let builder = builder(store_path, config)?;
    let report = builder
        .build_vocabulary_and_encode()
        .context("Vocabulary build failed")?;
    log_report(&report);
    Ok(report)
}

/// Encode documents lacking an encoding
pub fn missing(store_path: &Path, config: &ToolConfig) -> Result<IndexingReport> {
    let builder = builder(store_path, config)?;
    let report = builder
        .encode_missing_only()
        .context("Missing-only pass failed")?;
    log_report(&report);
    Ok(report)
}

/// Encode one stored document and render it as JSON
pub fn encode(store_path: &Path, id: &str, config: &ToolConfig) -> Result<serde_json::Value> {
    let builder = builder(store_path, config)?;
    let store = builder.store();
    let id_field = config.builder.id_field.as_str();

    let mut found = None;
    for entry in store.list_documents()? {
        if let Some(doc) = store.get_document(entry.id)?
            && doc.get_first(id_field).and_then(|v| v.as_text()) == Some(id)
        {
            found = Some(doc);
            break;
        }
    }
    let doc = found.with_context(|| format!("No document with {} = {:?}", id_field, id))?;

    let descriptor = builder.encode_single_document(&doc)?;
    let vocabulary = builder.vocabulary()?;
    Ok(serde_json::json!({
        "id": id,
        "encoding": descriptor.kind().name(),
        "dims": descriptor.dims(),
        "fingerprint": vocabulary.fingerprint_hex(),
        "visual_words": descriptor.to_text(),
        "descriptor": descriptor,
    }))
}

/// Summarize a vocabulary file
pub fn vocab_info(path: &Path, with_clusters: bool) -> Result<serde_json::Value> {
    let vocabulary =
        Vocabulary::load(path).with_context(|| format!("Failed to load vocabulary: {:?}", path))?;
    let members: Vec<u64> = vocabulary.clusters().iter().map(|c| c.members()).collect();
    let empty = members.iter().filter(|&&m| m == 0).count();

    let mut info = serde_json::json!({
        "path": path,
        "num_clusters": vocabulary.num_clusters(),
        "dim": vocabulary.dim(),
        "fingerprint": vocabulary.fingerprint_hex(),
        "size_bytes": vocabulary.size_bytes(),
        "empty_clusters": empty,
        "max_members": members.iter().copied().max().unwrap_or(0),
    });
    if with_clusters {
        info["members"] = serde_json::json!(members);
    }
    Ok(info)
}
