//! Local features and their byte codecs
//!
//! A local feature is a fixed-length `f64` descriptor extracted at one
//! keypoint. Documents store them as repeated byte values of one field;
//! a [`FeatureCodec`] knows the field, the byte layout and the feature's
//! native distance.

mod codec;

pub use codec::{CodecKind, F64Codec, U8Codec};

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Distance function native to a feature type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Distance {
    /// Euclidean (L2) distance
    #[default]
    Euclidean,
    /// Manhattan (L1) distance
    Manhattan,
}

impl Distance {
    #[inline]
    pub fn eval(self, a: &[f64], b: &[f64]) -> f64 {
        debug_assert_eq!(a.len(), b.len());
        match self {
            Distance::Euclidean => a
                .iter()
                .zip(b)
                .map(|(&x, &y)| (x - y) * (x - y))
                .sum::<f64>()
                .sqrt(),
            Distance::Manhattan => a.iter().zip(b).map(|(&x, &y)| (x - y).abs()).sum(),
        }
    }
}

/// Serializes local features to and from a named document field
pub trait FeatureCodec: Send {
    /// Field holding the raw local features
    fn field_name(&self) -> &str;

    /// Expected descriptor length, if fixed by the feature type
    fn dim(&self) -> Option<usize>;

    /// Native distance of this feature type
    fn distance(&self) -> Distance;

    fn encode(&self, feature: &[f64]) -> Vec<u8>;

    fn decode(&self, bytes: &[u8]) -> Result<Vec<f64>>;

    /// Decode every stored value of one document into a feature set
    fn decode_all(&self, values: &[Vec<u8>]) -> Result<LocalFeatureSet> {
        let mut set = LocalFeatureSet::new();
        for bytes in values {
            set.push(self.decode(bytes)?)?;
        }
        Ok(set)
    }
}

/// Builds a fresh codec; each encoding worker calls it once at startup
pub type CodecFactory = Arc<dyn Fn() -> Box<dyn FeatureCodec> + Send + Sync>;

/// Ordered local features of one document, all of the same length
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalFeatureSet {
    features: Vec<Vec<f64>>,
}

impl LocalFeatureSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_features(features: Vec<Vec<f64>>) -> Result<Self> {
        let mut set = Self::new();
        for f in features {
            set.push(f)?;
        }
        Ok(set)
    }

    pub fn push(&mut self, feature: Vec<f64>) -> Result<()> {
        if let Some(dim) = self.dim()
            && dim != feature.len()
        {
            return Err(Error::DimensionMismatch {
                expected: dim,
                got: feature.len(),
            });
        }
        if feature.is_empty() {
            return Err(Error::Codec("empty local feature".to_string()));
        }
        self.features.push(feature);
        Ok(())
    }

    /// Feature dimensionality, `None` for an empty set
    pub fn dim(&self) -> Option<usize> {
        self.features.first().map(Vec::len)
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &[f64]> {
        self.features.iter().map(Vec::as_slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distances() {
        let a = [0.0, 0.0];
        let b = [3.0, 4.0];
        assert_eq!(Distance::Euclidean.eval(&a, &b), 5.0);
        assert_eq!(Distance::Manhattan.eval(&a, &b), 7.0);
    }

    #[test]
    fn test_feature_set_rejects_mixed_dims() {
        let mut set = LocalFeatureSet::new();
        set.push(vec![1.0, 2.0]).unwrap();
        let err = set.push(vec![1.0]).unwrap_err();
        assert!(matches!(
            err,
            Error::DimensionMismatch {
                expected: 2,
                got: 1
            }
        ));
        assert_eq!(set.len(), 1);
    }
}
