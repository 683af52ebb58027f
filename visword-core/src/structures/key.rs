//! Structured vocabulary keys
//!
//! One key per (encoding, feature type, detector, cluster count). The key
//! is the only thing that decides vocabulary file names and the names of
//! the encoded document fields, so two descriptor pipelines sharing a store
//! can never pick up each other's vocabulary.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Vocabulary file extension
pub const VOCABULARY_EXTENSION: &str = "vwv";

/// Global descriptor produced from a vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncodingKind {
    /// Bag of visual words histogram
    #[default]
    Bovw,
    /// Vector of locally aggregated descriptors
    Vlad,
}

impl EncodingKind {
    pub fn name(self) -> &'static str {
        match self {
            EncodingKind::Bovw => "bovw",
            EncodingKind::Vlad => "vlad",
        }
    }

    /// Default worker count for an encoding pass
    pub fn default_workers(self) -> usize {
        match self {
            EncodingKind::Bovw => 8,
            EncodingKind::Vlad => 4,
        }
    }
}

impl std::str::FromStr for EncodingKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "bovw" | "histogram" => Ok(EncodingKind::Bovw),
            "vlad" => Ok(EncodingKind::Vlad),
            other => Err(Error::Config(format!("unknown encoding '{other}'"))),
        }
    }
}

/// Lowercase `[a-z0-9_]+` identifier for a feature type or detector
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Tag(String);

impl Tag {
    pub fn new(raw: &str) -> Result<Self> {
        let tag = raw.trim().to_ascii_lowercase();
        if tag.is_empty() {
            return Err(Error::Config("tag must not be empty".to_string()));
        }
        if let Some(c) = tag
            .chars()
            .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_'))
        {
            return Err(Error::Config(format!(
                "tag '{raw}' contains '{c}', only [a-z0-9_] allowed"
            )));
        }
        Ok(Self(tag))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Tag {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Tag::new(&value)
    }
}

impl From<Tag> for String {
    fn from(tag: Tag) -> Self {
        tag.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Names of the document fields written by one encoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFields {
    /// Visual-word token text (BOVW) or VLAD bytes
    pub visual_words: String,
    /// Dense histogram bytes (BOVW only)
    pub histogram: Option<String>,
    /// Hex fingerprint of the vocabulary the encoding was built with;
    /// present on every encoded document
    pub fingerprint: String,
}

impl EncodedFields {
    /// Every field name this encoding owns
    pub fn all(&self) -> Vec<&str> {
        let mut fields = vec![self.visual_words.as_str(), self.fingerprint.as_str()];
        if let Some(ref h) = self.histogram {
            fields.push(h);
        }
        fields
    }
}

/// Identity of a vocabulary
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VocabularyKey {
    pub encoding: EncodingKind,
    pub feature: Tag,
    pub detector: Tag,
    pub num_clusters: usize,
    /// Vocabulary was supplied as a codebook instead of clustered here
    #[serde(default)]
    pub codebook: bool,
}

impl VocabularyKey {
    pub fn new(
        encoding: EncodingKind,
        feature: &str,
        detector: &str,
        num_clusters: usize,
    ) -> Result<Self> {
        Ok(Self {
            encoding,
            feature: Tag::new(feature)?,
            detector: Tag::new(detector)?,
            num_clusters,
            codebook: false,
        })
    }

    pub fn with_codebook(mut self, codebook: bool) -> Self {
        self.codebook = codebook;
        self
    }

    /// The single naming function for vocabulary files
    pub fn file_name(&self) -> String {
        let origin = if self.codebook { "cb-" } else { "" };
        format!(
            "{}{}-{}-{}-k{}.{}",
            origin,
            self.encoding.name(),
            self.feature,
            self.detector,
            self.num_clusters,
            VOCABULARY_EXTENSION
        )
    }

    pub fn path_in(&self, dir: &Path) -> PathBuf {
        dir.join(self.file_name())
    }

    /// Document fields written by encodings under this key
    ///
    /// Codebook-sourced and clustered vocabularies share field names: a
    /// document holds one encoding per (encoding, feature, detector). The
    /// `.` separator cannot occur inside a tag, so prefixes never collide.
    pub fn fields(&self) -> EncodedFields {
        let prefix = format!("{}.{}", self.feature, self.detector);
        match self.encoding {
            EncodingKind::Bovw => EncodedFields {
                visual_words: format!("{prefix}.vw"),
                histogram: Some(format!("{prefix}.hist")),
                fingerprint: format!("{prefix}.vw_vocab"),
            },
            EncodingKind::Vlad => EncodedFields {
                visual_words: format!("{prefix}.vlad"),
                histogram: None,
                fingerprint: format!("{prefix}.vlad_vocab"),
            },
        }
    }
}
