//! Built-in local feature codecs

use std::io::Cursor;
use std::sync::Arc;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};

use super::{CodecFactory, Distance, FeatureCodec};
use crate::error::{Error, Result};

/// Raw little-endian `f64` components (SURF-style float descriptors)
#[derive(Debug, Clone)]
pub struct F64Codec {
    field: String,
    dim: Option<usize>,
    distance: Distance,
}

impl F64Codec {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            dim: None,
            distance: Distance::Euclidean,
        }
    }

    pub fn with_dim(mut self, dim: usize) -> Self {
        self.dim = Some(dim);
        self
    }

    pub fn with_distance(mut self, distance: Distance) -> Self {
        self.distance = distance;
        self
    }
}

impl FeatureCodec for F64Codec {
    fn field_name(&self) -> &str {
        &self.field
    }

    fn dim(&self) -> Option<usize> {
        self.dim
    }

    fn distance(&self) -> Distance {
        self.distance
    }

    fn encode(&self, feature: &[f64]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(feature.len() * 8);
        for &v in feature {
            // Vec<u8> writes are infallible
            let _ = buf.write_f64::<LittleEndian>(v);
        }
        buf
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<f64>> {
        if bytes.is_empty() || bytes.len() % 8 != 0 {
            return Err(Error::Codec(format!(
                "f64 feature has invalid byte length {}",
                bytes.len()
            )));
        }
        let len = bytes.len() / 8;
        check_dim(self.dim, len)?;
        let mut reader = Cursor::new(bytes);
        let mut out = Vec::with_capacity(len);
        for _ in 0..len {
            out.push(reader.read_f64::<LittleEndian>()?);
        }
        Ok(out)
    }
}

/// One byte per component (SIFT-style quantized descriptors)
///
/// Components are rounded and clamped to `0..=255` on encode.
#[derive(Debug, Clone)]
pub struct U8Codec {
    field: String,
    dim: Option<usize>,
}

impl U8Codec {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            dim: None,
        }
    }

    pub fn with_dim(mut self, dim: usize) -> Self {
        self.dim = Some(dim);
        self
    }
}

impl FeatureCodec for U8Codec {
    fn field_name(&self) -> &str {
        &self.field
    }

    fn dim(&self) -> Option<usize> {
        self.dim
    }

    fn distance(&self) -> Distance {
        Distance::Euclidean
    }

    fn encode(&self, feature: &[f64]) -> Vec<u8> {
        feature
            .iter()
            .map(|&v| v.round().clamp(0.0, 255.0) as u8)
            .collect()
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<f64>> {
        if bytes.is_empty() {
            return Err(Error::Codec("empty u8 feature".to_string()));
        }
        check_dim(self.dim, bytes.len())?;
        Ok(bytes.iter().map(|&b| b as f64).collect())
    }
}

fn check_dim(expected: Option<usize>, got: usize) -> Result<()> {
    match expected {
        Some(expected) if expected != got => Err(Error::DimensionMismatch { expected, got }),
        _ => Ok(()),
    }
}

/// Tagged choice of built-in codec, used by configuration and the CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodecKind {
    #[default]
    F64,
    U8,
}

impl CodecKind {
    /// Factory producing fresh codecs of this kind for `field`
    pub fn factory(self, field: &str, dim: Option<usize>) -> CodecFactory {
        let field = field.to_string();
        match self {
            CodecKind::F64 => Arc::new(move || {
                let codec = F64Codec::new(field.clone());
                Box::new(match dim {
                    Some(d) => codec.with_dim(d),
                    None => codec,
                }) as Box<dyn FeatureCodec>
            }),
            CodecKind::U8 => Arc::new(move || {
                let codec = U8Codec::new(field.clone());
                Box::new(match dim {
                    Some(d) => codec.with_dim(d),
                    None => codec,
                }) as Box<dyn FeatureCodec>
            }),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CodecKind::F64 => "f64",
            CodecKind::U8 => "u8",
        }
    }
}

impl std::str::FromStr for CodecKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "f64" | "double" => Ok(CodecKind::F64),
            "u8" | "byte" => Ok(CodecKind::U8),
            other => Err(Error::Config(format!("unknown codec '{other}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_f64_codec_is_exact() {
        let codec = F64Codec::new("surf").with_dim(3);
        let feature = vec![0.1, -2.5e-300, f64::MAX];
        let bytes = codec.encode(&feature);
        assert_eq!(bytes.len(), 24);
        let decoded = codec.decode(&bytes).unwrap();
        for (a, b) in feature.iter().zip(&decoded) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }

    #[test]
    fn test_f64_codec_rejects_bad_lengths() {
        let codec = F64Codec::new("surf").with_dim(2);
        assert!(matches!(codec.decode(&[0u8; 7]), Err(Error::Codec(_))));
        assert!(matches!(
            codec.decode(&[0u8; 24]),
            Err(Error::DimensionMismatch {
                expected: 2,
                got: 3
            })
        ));
    }

    #[test]
    fn test_u8_codec_clamps() {
        let codec = U8Codec::new("sift");
        let bytes = codec.encode(&[-4.0, 12.4, 300.0]);
        assert_eq!(bytes, vec![0, 12, 255]);
        assert_eq!(codec.decode(&bytes).unwrap(), vec![0.0, 12.0, 255.0]);
    }

    #[test]
    fn test_factory_builds_independent_codecs() {
        let factory = CodecKind::U8.factory("sift", Some(4));
        let a = factory();
        let b = factory();
        assert_eq!(a.field_name(), "sift");
        assert_eq!(b.dim(), Some(4));
        assert_eq!("double".parse::<CodecKind>().unwrap(), CodecKind::F64);
    }
}
