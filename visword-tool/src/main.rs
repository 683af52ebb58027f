//! Visword Tool - CLI for visual vocabulary building and document encoding
//!
//! # Overview
//!
//! This package provides command-line tools for loading local image features
//! into a document store, clustering them into a visual vocabulary and
//! encoding every document as a BOVW histogram or VLAD vector.
//!
//! # Store Commands
//!
//! - `ingest` - Add documents with local features from a JSONL file
//!
//! # Vocabulary Commands
//!
//! - `build` - Build a vocabulary and encode every document
//! - `missing` - Encode only documents that have no encoding yet
//! - `encode` - Encode a single stored document and print it as JSON
//! - `vocab-info` - Display vocabulary file information
//!
//! # Examples
//!
//! ## Ingest features
//! ```bash
//! visword-tool ingest -s ./store -d features.jsonl --codec u8
//! ```
//!
//! ## Build a 1024-word SURF vocabulary
//! ```bash
//! visword-tool build -s ./store -k 1024 --feature surf --detector dog -j 8
//! ```
//!
//! ## Encode newly added documents with VLAD
//! ```bash
//! visword-tool missing -s ./store --encoding vlad -k 64
//! ```

mod ops;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing::info;

use visword_core::{CodecKind, EncodingKind, EngineKind, Seeding, VocabularySource};

use crate::ops::ToolConfig;

#[derive(Parser)]
#[command(name = "visword-tool")]
#[command(version, about = "CLI for visual vocabulary building and document encoding")]
#[command(after_help = "Use 'visword-tool <command> --help' for more information.")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every store command. Flags override the config file.
#[derive(Args, Debug, Clone)]
struct StoreArgs {
    /// Path to the store directory
    #[arg(short, long)]
    store: PathBuf,

    /// JSON file with builder options
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Encoding: bovw or vlad
    #[arg(short, long)]
    encoding: Option<EncodingKind>,

    /// Feature type tag (e.g. surf, sift)
    #[arg(long)]
    feature: Option<String>,

    /// Keypoint detector tag (e.g. dog, hessian)
    #[arg(long)]
    detector: Option<String>,

    /// Number of clusters (visual words)
    #[arg(short = 'k', long)]
    clusters: Option<usize>,

    /// Raw feature codec: f64 or u8
    #[arg(long)]
    codec: Option<CodecKind>,

    /// Raw feature field (default: the feature tag)
    #[arg(long)]
    field: Option<String>,

    /// Expected descriptor length
    #[arg(long)]
    dim: Option<usize>,

    /// Directory holding vocabulary files
    #[arg(long)]
    vocab_dir: Option<PathBuf>,

    /// Unique identifier field
    #[arg(long)]
    id_field: Option<String>,
}

impl StoreArgs {
    fn config(&self) -> Result<ToolConfig> {
        let mut config = ToolConfig::load(self.config.as_deref())?;
        if let Some(encoding) = self.encoding {
            config.builder.encoding = encoding;
        }
        if let Some(ref feature) = self.feature {
            config.builder.feature = feature.clone();
        }
        if let Some(ref detector) = self.detector {
            config.builder.detector = detector.clone();
        }
        if let Some(k) = self.clusters {
            config.builder.num_clusters = k;
        }
        if let Some(codec) = self.codec {
            config.codec = codec;
        }
        if self.field.is_some() {
            config.field = self.field.clone();
        }
        if self.dim.is_some() {
            config.dim = self.dim;
        }
        if let Some(ref dir) = self.vocab_dir {
            config.builder.vocabulary_dir = dir.clone();
        }
        if let Some(ref id_field) = self.id_field {
            config.builder.id_field = id_field.clone();
        }
        Ok(config)
    }
}

#[derive(Subcommand)]
enum Commands {
    // === Store Commands ===
    /// Add documents from a JSONL file ({"id": .., "features": [[..], ..]})
    Ingest {
        #[command(flatten)]
        store: StoreArgs,

        /// Path to JSONL documents file
        #[arg(short, long)]
        documents: PathBuf,
    },

    // === Vocabulary Commands ===
    /// Build a vocabulary and encode every document
    Build {
        #[command(flatten)]
        store: StoreArgs,

        /// Documents sampled for clustering (default: half the store)
        #[arg(long)]
        samples: Option<usize>,

        /// Number of encoding workers
        #[arg(short = 'j', long)]
        workers: Option<usize>,

        /// Centroid seeding: random or kmeans++
        #[arg(long)]
        seeding: Option<Seeding>,

        /// Clustering engine: single, parallel or parallel:N
        #[arg(long)]
        engine: Option<EngineKind>,

        /// Random seed for sampling and seeding
        #[arg(long)]
        seed: Option<u64>,

        /// Reuse an existing vocabulary file instead of clustering
        #[arg(long)]
        codebook: Option<PathBuf>,

        /// Rescale histograms to [0, 128)
        #[arg(long, default_value = "false")]
        quantize: bool,

        /// Remove raw features after encoding
        #[arg(long, default_value = "false")]
        discard_raw: bool,

        /// Roll back everything if any document fails
        #[arg(long, default_value = "false")]
        abort_on_failure: bool,
    },

    /// Encode documents that have no encoding yet
    Missing {
        #[command(flatten)]
        store: StoreArgs,

        /// Also re-encode documents built with a different vocabulary
        #[arg(long, default_value = "false")]
        reencode_stale: bool,
    },

    /// Encode one stored document and print it as JSON
    Encode {
        #[command(flatten)]
        store: StoreArgs,

        /// Identifier of the document
        #[arg(short, long)]
        id: String,
    },

    /// Display vocabulary file information
    VocabInfo {
        /// Path to the vocabulary file
        #[arg(short, long)]
        vocabulary: PathBuf,

        /// Include per-cluster member counts
        #[arg(long, default_value = "false")]
        clusters: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("visword_tool=info".parse()?)
                .add_directive("visword_core=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Ingest { store, documents } => {
            let config = store.config()?;
            ops::ingest(&store.store, &documents, &config)?;
        }
        Commands::Build {
            store,
            samples,
            workers,
            seeding,
            engine,
            seed,
            codebook,
            quantize,
            discard_raw,
            abort_on_failure,
        } => {
            let mut config = store.config()?;
            let builder = &mut config.builder;
            if samples.is_some() {
                builder.sample_docs = samples;
            }
            if workers.is_some() {
                builder.workers = workers;
            }
            if let Some(seeding) = seeding {
                builder.seeding = seeding;
            }
            if let Some(engine) = engine {
                builder.engine = engine;
            }
            if seed.is_some() {
                builder.seed = seed;
            }
            if let Some(path) = codebook {
                builder.source = VocabularySource::Codebook { path };
            }
            builder.quantize |= quantize;
            builder.discard_raw |= discard_raw;
            builder.abort_on_failure |= abort_on_failure;

            let report = ops::build(&store.store, &config)?;
            if report.failed() > 0 {
                info!("{} documents failed, see warnings above", report.failed());
            }
        }
        Commands::Missing {
            store,
            reencode_stale,
        } => {
            let mut config = store.config()?;
            config.builder.reencode_stale |= reencode_stale;
            ops::missing(&store.store, &config)?;
        }
        Commands::Encode { store, id } => {
            let config = store.config()?;
            let json = ops::encode(&store.store, &id, &config)?;
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        Commands::VocabInfo {
            vocabulary,
            clusters,
        } => {
            let info = ops::vocab_info(&vocabulary, clusters)?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
    }

    Ok(())
}
