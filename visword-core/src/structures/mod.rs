//! Persistent structures: vocabularies and the keys that name them

mod key;
mod vocabulary;

pub use key::{EncodedFields, EncodingKind, Tag, VOCABULARY_EXTENSION, VocabularyKey};
pub use vocabulary::{Cluster, Vocabulary};
