//! Error types for visword

use std::io;
use std::path::PathBuf;

use crate::DocId;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Insufficient features to cluster: need at least {needed}, sampled {available}")]
    InsufficientFeatures { needed: usize, available: usize },

    #[error(
        "Vocabulary sampling exhausted: accepted {accepted} of {wanted} documents after {attempts} draws"
    )]
    SamplingExhausted {
        wanted: usize,
        accepted: usize,
        attempts: usize,
    },

    #[error("Vocabulary corruption: {0}")]
    Corruption(String),

    #[error("Vocabulary file not found: {}", .0.display())]
    VocabularyNotFound(PathBuf),

    #[error("Feature codec error: {0}")]
    Codec(String),

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Duplicate primary key: {0}")]
    DuplicatePrimaryKey(String),

    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    #[error("Encoding failed for {failures} document(s)")]
    EncodingFailed { failures: usize },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Failure encoding a single document during a pass.
#[derive(Debug)]
pub struct DocumentFailure {
    pub doc: DocId,
    pub error: Error,
}

pub type Result<T> = std::result::Result<T, Error>;
