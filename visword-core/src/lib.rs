//! Visword - visual vocabulary construction and encoding
//!
//! Builds a bag-of-visual-words or VLAD vocabulary from the local features
//! stored in a document collection and encodes every document into a
//! fixed-length global descriptor:
//! - Bounded, duplicate-free document sampling
//! - Single-threaded and rayon-parallel k-means with k-means++ seeding
//! - Fingerprinted binary vocabulary files named by a structured key
//! - BOVW histograms (sparse token text + dense bytes) and VLAD vectors
//! - Partitioned multi-threaded encoding with aggregated progress,
//!   cancellation and per-document failure reports
//! - In-memory and file-backed reference document stores

pub mod builder;
pub mod clustering;
pub mod document;
pub mod encoder;
pub mod error;
pub mod features;
pub mod progress;
pub mod sampler;
pub mod store;
pub mod structures;

pub use builder::{BuilderConfig, IndexingReport, VocabularyBuilder, VocabularySource};
pub use clustering::{
    ClusteringEngine, ClusteringReport, Convergence, EngineKind, KMeans, ParallelKMeans, Seeding,
    run_to_convergence,
};
pub use document::{Document, FieldValue};
pub use encoder::{EncodedDescriptor, Encoder};
pub use error::{DocumentFailure, Error, Result};
pub use features::{
    CodecFactory, CodecKind, Distance, F64Codec, FeatureCodec, LocalFeatureSet, U8Codec,
};
pub use progress::{CancellationToken, LogReporter, Phase, ProgressReporter, ProgressTracker};
pub use sampler::VocabularySampler;
pub use store::{DocEntry, DocumentStore, FsStore, RamStore};
pub use structures::{Cluster, EncodedFields, EncodingKind, Tag, Vocabulary, VocabularyKey};

/// Document id within a store's id space
pub type DocId = u32;

/// Default unique identifier field
pub const DEFAULT_ID_FIELD: &str = "identifier";
